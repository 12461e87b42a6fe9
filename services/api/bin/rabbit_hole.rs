//! Runs a single rabbit hole walk from the terminal.
//!
//! Progress goes to stderr and the narration streams to stdout as it is
//! generated, followed by a summary of the journey.

use anyhow::Context;
use clap::Parser;
use rabbit_hole_api::{config::Config, provider::build_walker};
use rabbit_hole_core::{
    Hop, Personality, RabbitHoleInput,
    progress::{Phase, ProgressReporter},
    relay::{ChannelSink, NarrationEvent},
};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Parser, Debug)]
#[command(name = "rabbit-hole", about = "Follow a topic down a rabbit hole")]
struct Cli {
    /// Topic to start from.
    #[arg(long)]
    topic: String,
    #[arg(long, default_value_t = 4, help = "Maximum number of hops (1-10)")]
    hops: usize,
    #[arg(long, default_value = "curious-generalist")]
    personality: Personality,
}

/// Prints progress lines to stderr.
#[derive(Default)]
struct ConsoleProgress {
    max_hops: AtomicUsize,
    current_hop: AtomicUsize,
}

impl ProgressReporter for ConsoleProgress {
    fn set_max(&self, max_hops: usize) {
        self.max_hops.store(max_hops, Ordering::Relaxed);
    }

    fn set_current_hop(&self, hop: usize) {
        self.current_hop.store(hop, Ordering::Relaxed);
    }

    fn set_current_topic(&self, topic: &str) {
        eprintln!(
            "[{}/{}] exploring {}",
            self.current_hop.load(Ordering::Relaxed),
            self.max_hops.load(Ordering::Relaxed),
            topic
        );
    }

    fn set_phase(&self, phase: Phase) {
        if phase == Phase::GeneratingNarrative {
            eprintln!("generating narrative...\n");
        }
    }

    fn append_hop(&self, hop: &Hop) {
        match &hop.chosen_next {
            Some(next) => eprintln!("  -> {} ({})", next, hop.reasoning),
            None => eprintln!("  -> stop: {}", hop.reasoning),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let walker = build_walker(&config)?;
    let input = RabbitHoleInput::new(cli.topic, cli.hops, cli.personality);

    let (sink, mut events) = ChannelSink::new(32);
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = events.recv().await {
            match event {
                NarrationEvent::Fragment(fragment) => {
                    print!("{}", fragment);
                    let _ = stdout.flush();
                }
                NarrationEvent::End(ack) => {
                    println!();
                    let _ = ack.send(());
                    return;
                }
                NarrationEvent::Aborted(reason) => {
                    eprintln!("\nnarration aborted: {}", reason);
                    return;
                }
            }
        }
    });

    let progress = ConsoleProgress::default();
    let outcome = walker.run(input, &progress, &sink).await;
    drop(sink);
    printer.await.context("Narration printer panicked")?;
    let result = outcome.context("Rabbit hole run failed")?;

    println!("\n{} -> {} in {} hops", result.start, result.end, result.hop_count);
    for (i, hop) in result.journey.iter().enumerate() {
        println!("{:>2}. {}", i + 1, hop.topic);
        println!("    summary:  {}", hop.summary);
        println!("    surprise: {}", hop.surprise);
        match &hop.chosen_next {
            Some(next) => println!("    next:     {}", next),
            None => println!("    next:     - ({})", hop.reasoning),
        }
        for source in &hop.sources {
            println!("      {}", source);
        }
    }
    Ok(())
}
