use std::{sync::Arc, time::Instant};

use anyhow::Result;
use client_core::{
    gesture::Point, load_queue, CardStack, ClientSettings, DecisionDispatcher, Item, Release,
    RemoteClient, StackEvent,
};
use shared::domain::Outcome;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const HELP: &str = "a = accept, r = reject, d <dx> = drag by dx pixels, q = quit";

pub async fn run(
    client: &RemoteClient,
    dispatcher: Arc<dyn DecisionDispatcher>,
    settings: &ClientSettings,
    max_items: usize,
) -> Result<()> {
    let items = load_queue(client, settings.feed_page_size, max_items).await?;
    let swipe = settings.swipe_settings();
    let mut stack = CardStack::new(items, swipe, dispatcher);
    println!("{} candidates queued. {HELP}", stack.len());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while !stack.is_exhausted() {
        if let Some(item) = stack.current() {
            print_card(item, stack.cursor(), stack.len());
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let now = Instant::now();
        let release = match line.trim().split_whitespace().collect::<Vec<_>>().as_slice() {
            ["a"] => stack.press(Outcome::Accept, now),
            ["r"] => stack.press(Outcome::Reject, now),
            ["d", dx] => match dx.parse::<f32>() {
                Ok(dx) => {
                    stack.begin_drag(Point::new(0.0, 0.0));
                    stack.drag_to(Point::new(dx, 0.0));
                    stack.release(now)
                }
                Err(_) => {
                    println!("not a number: {dx}");
                    continue;
                }
            },
            ["q"] => break,
            _ => {
                println!("{HELP}");
                continue;
            }
        };

        match release {
            Release::Decided(decision) => {
                println!("{} -> {}", decision.item_id, decision.outcome);
                tokio::time::sleep(swipe.exit_delay).await;
            }
            Release::SnappedBack => println!("inside the dead zone, card snaps back"),
            Release::Ignored => {}
        }
        report(stack.tick(Instant::now()));
    }

    report(stack.settle().await);
    info!(reviewed = stack.reviewed(), remaining = stack.remaining(), "review: session finished");
    println!("reviewed {} / remaining {}", stack.reviewed(), stack.remaining());
    Ok(())
}

fn print_card(item: &Item, cursor: usize, total: usize) {
    println!(
        "[{}/{}] {}  {}  {} ({:.0})",
        cursor + 1,
        total,
        item.headline.as_deref().unwrap_or("(no headline)"),
        item.location.as_deref().unwrap_or("-"),
        item.fit_band().label(),
        item.score
    );
}

fn report(events: Vec<StackEvent>) {
    for event in events {
        match event {
            StackEvent::Exhausted { reviewed } => println!("all {reviewed} candidates reviewed"),
            StackEvent::DecisionFailed { item_id, error } => {
                println!("decision for {item_id} not saved yet: {error}")
            }
            StackEvent::Advanced { .. } | StackEvent::DecisionSettled { .. } => {}
        }
    }
}
