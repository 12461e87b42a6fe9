//! Walk Controller
//!
//! Drives a curiosity walk hop by hop. Each hop explores the current topic,
//! marks it visited, then picks the next topic among the unvisited offramps.
//! The walk stops on a dead end or when the hop budget is spent, and finishes
//! by narrating the journey through the narration relay.

use crate::error::{Error, Result};
use crate::gateway::ModelGateway;
use crate::journey::{Hop, Journey, RabbitHoleInput, RabbitHoleResult, VisitedSet};
use crate::progress::{Phase, ProgressReporter};
use crate::relay::{NarrationSink, relay};
use std::time::Duration;
use tracing::info;

/// Wall-clock budget for a whole run, model calls and narration included.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug)]
enum WalkState {
    Exploring(usize),
    Narrating,
    Done(String),
}

/// Runs walks against a `ModelGateway`.
#[derive(Clone)]
pub struct WalkController {
    gateway: ModelGateway,
    run_timeout: Duration,
}

impl WalkController {
    pub fn new(gateway: ModelGateway) -> Self {
        Self {
            gateway,
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }

    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    /// Runs one walk to completion.
    ///
    /// Progress is reported to `progress` as the walk advances and narration
    /// fragments are published to `sink`. Any failure, including the run
    /// exceeding its time budget, is returned as-is; no partial result is
    /// produced.
    pub async fn run(
        &self,
        input: RabbitHoleInput,
        progress: &dyn ProgressReporter,
        sink: &dyn NarrationSink,
    ) -> Result<RabbitHoleResult> {
        input.validate()?;
        match tokio::time::timeout(self.run_timeout, self.walk(&input, progress, sink)).await {
            Ok(result) => result,
            Err(_) => {
                let message = format!(
                    "run exceeded its {}s budget",
                    self.run_timeout.as_secs_f32()
                );
                sink.abort(&message).await;
                Err(Error::UpstreamTimeout(message))
            }
        }
    }

    async fn walk(
        &self,
        input: &RabbitHoleInput,
        progress: &dyn ProgressReporter,
        sink: &dyn NarrationSink,
    ) -> Result<RabbitHoleResult> {
        let personality = input.personality;
        let max_hops = input.max_hops;

        info!(
            start_topic = %input.start_topic,
            %personality,
            max_hops,
            "Starting rabbit hole"
        );
        progress.set_max(max_hops);

        let mut current_topic = input.start_topic.clone();
        let mut visited = VisitedSet::new();
        let mut journey = Journey::new();
        let mut state = WalkState::Exploring(0);

        loop {
            state = match state {
                WalkState::Exploring(i) if i >= max_hops => WalkState::Narrating,
                WalkState::Exploring(i) => {
                    progress.set_current_hop(i + 1);
                    progress.set_current_topic(&current_topic);
                    progress.set_phase(Phase::Exploring);
                    info!(hop = i + 1, topic = %current_topic, "Exploring");

                    let exploration = self
                        .gateway
                        .explore(&current_topic, personality, &visited)
                        .await?;
                    // Explore saw only prior hops; pick must also exclude this one.
                    visited.insert(&current_topic);
                    let pick = self
                        .gateway
                        .pick_next(&exploration.offramps, &visited, personality, &journey)
                        .await?;

                    let hop = Hop {
                        topic: current_topic.clone(),
                        summary: exploration.summary,
                        surprise: exploration.surprise,
                        offramps: exploration.offramps,
                        chosen_next: pick.next.clone(),
                        reasoning: pick.reasoning,
                        sources: exploration.sources,
                    };
                    progress.append_hop(&hop);
                    info!(
                        hop = i + 1,
                        topic = %hop.topic,
                        next = ?hop.chosen_next,
                        sources = hop.sources.len(),
                        "Completed hop"
                    );
                    journey.push(hop);

                    match pick.next {
                        None => {
                            if let Some(last) = journey.last() {
                                info!(reasoning = %last.reasoning, "Journey ended");
                            }
                            WalkState::Narrating
                        }
                        Some(_) if i + 1 >= max_hops => WalkState::Narrating,
                        Some(next) => {
                            current_topic = next;
                            WalkState::Exploring(i + 1)
                        }
                    }
                }
                WalkState::Narrating => {
                    progress.set_phase(Phase::GeneratingNarrative);
                    info!(hops = journey.len(), "Generating narrative");

                    let fragments = match self.gateway.narrate(&journey, personality).await {
                        Ok(fragments) => fragments,
                        Err(e) => {
                            sink.abort(&e.to_string()).await;
                            return Err(e);
                        }
                    };
                    WalkState::Done(relay(fragments, sink).await?)
                }
                WalkState::Done(narrative) => {
                    let result =
                        RabbitHoleResult::new(input.start_topic.clone(), journey, narrative);
                    info!(
                        start = %result.start,
                        end = %result.end,
                        hops = result.hop_count,
                        "Rabbit hole complete"
                    );
                    return Ok(result);
                }
            };
        }
    }
}
