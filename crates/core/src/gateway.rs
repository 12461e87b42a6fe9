//! Model Gateway
//!
//! Turns the three things a walk needs from the model (explore a topic, pick
//! the next one, narrate the journey) into prompts, and turns the model's text
//! back into validated values. JSON replies are checked against a fixed shape
//! and rejected on any deviation; nothing is coerced.

use crate::error::{Error, Result};
use crate::journey::{Journey, VisitedSet, fold_topic};
use crate::llm_client::{CallProfile, CompletionRequest, LLMClient, LLMStream};
use crate::personality::Personality;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Reasoning recorded when every offramp has already been visited.
pub const DEAD_END_REASONING: &str = "Dead end - all offramps already visited";

/// Number of offramps the explore prompt asks for.
pub const OFFRAMP_TARGET: usize = 5;

/// What the model found out about one topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Exploration {
    pub summary: String,
    pub surprise: String,
    pub offramps: Vec<String>,
    pub sources: Vec<String>,
}

/// The decision about where a walk goes next.
#[derive(Debug, Clone, PartialEq)]
pub struct PickOutcome {
    /// `None` is a dead end: the walk should stop and narrate.
    pub next: Option<String>,
    pub reasoning: String,
}

impl PickOutcome {
    pub fn dead_end() -> Self {
        Self {
            next: None,
            reasoning: DEAD_END_REASONING.to_string(),
        }
    }
}

/// Generation settings for each of the gateway's call sites.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayProfiles {
    pub explore: CallProfile,
    pub pick: CallProfile,
    pub narrate: CallProfile,
}

impl Default for GatewayProfiles {
    fn default() -> Self {
        Self {
            explore: CallProfile {
                temperature: None,
                thinking_budget: Some(0),
                web_search: true,
            },
            pick: CallProfile {
                temperature: None,
                thinking_budget: Some(0),
                web_search: false,
            },
            narrate: CallProfile {
                temperature: Some(1.4),
                thinking_budget: Some(0),
                web_search: false,
            },
        }
    }
}

#[derive(Deserialize)]
struct ExploreReply {
    summary: String,
    surprise: String,
    offramps: Vec<String>,
}

#[derive(Deserialize)]
struct PickReply {
    // Present-but-null is a dead end; an absent key is a schema violation.
    #[serde(deserialize_with = "Option::deserialize")]
    next: Option<String>,
    reasoning: String,
}

/// Removes a markdown code fence the model may wrap around its JSON.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches("json"),
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

fn parse_json<'a, T: Deserialize<'a>>(text: &'a str, what: &str) -> Result<T> {
    serde_json::from_str(strip_code_fences(text))
        .map_err(|e| Error::MalformedResponse(format!("{} reply: {}", what, e)))
}

fn parse_exploration(text: &str, sources: Vec<String>) -> Result<Exploration> {
    let reply: ExploreReply = parse_json(text, "explore")?;
    if reply.summary.trim().is_empty() {
        return Err(Error::MalformedResponse(
            "explore reply has an empty summary".to_string(),
        ));
    }
    if reply.surprise.trim().is_empty() {
        return Err(Error::MalformedResponse(
            "explore reply has an empty surprise".to_string(),
        ));
    }
    if reply.offramps.iter().any(|o| o.trim().is_empty()) {
        return Err(Error::MalformedResponse(
            "explore reply has a blank offramp".to_string(),
        ));
    }
    Ok(Exploration {
        summary: reply.summary,
        surprise: reply.surprise,
        offramps: reply
            .offramps
            .into_iter()
            .map(|o| o.trim().to_string())
            .collect(),
        sources,
    })
}

/// Validates a pick reply against the candidates that were offered and
/// returns the candidate's own spelling for the chosen topic.
fn parse_pick(text: &str, candidates: &[&String]) -> Result<PickOutcome> {
    let reply: PickReply = parse_json(text, "pick")?;
    if reply.reasoning.trim().is_empty() {
        return Err(Error::MalformedResponse(
            "pick reply has empty reasoning".to_string(),
        ));
    }
    let next = match reply.next {
        None => None,
        Some(choice) => {
            let wanted = fold_topic(&choice);
            let chosen = candidates
                .iter()
                .find(|c| fold_topic(c) == wanted)
                .ok_or_else(|| {
                    Error::MalformedResponse(format!(
                        "pick reply chose '{}', which was not offered",
                        choice
                    ))
                })?;
            Some(chosen.trim().to_string())
        }
    };
    Ok(PickOutcome {
        next,
        reasoning: reply.reasoning,
    })
}

fn explore_system(personality: Personality) -> String {
    format!(
        "You are a {}. You love discovering surprising connections and obscure facts. \
When researching topics, dig for the weird, unexpected angles that make people say \"wait, really?\".\n\n\
For offramps, suggest specific, intriguing tangents - not generic categories.\n\
Bad: \"Italian cuisine\"\n\
Good: \"Why Europeans feared tomatoes for 200 years\"\n\n\
IMPORTANT: Return ONLY valid JSON, no markdown code blocks.",
        personality.persona()
    )
}

fn explore_prompt(topic: &str, visited: &VisitedSet) -> String {
    let visited_list = if visited.is_empty() {
        "none".to_string()
    } else {
        visited.iter().collect::<Vec<_>>().join(", ")
    };
    let offramp_slots = (1..=OFFRAMP_TARGET)
        .map(|i| format!("\"topic{}\"", i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Research this topic: \"{topic}\"\n\n\
Already visited (avoid suggesting these as offramps): {visited_list}\n\n\
Return your findings as JSON with this exact structure:\n\
{{\"summary\": \"2-3 sentences\", \"surprise\": \"one wait really fact\", \"offramps\": [{offramp_slots}]}}"
    )
}

fn pick_system(personality: Personality) -> String {
    format!(
        "You are a {}. Pick topics that create surprising connections or delightful contrasts \
with the journey so far. Return ONLY valid JSON, no markdown.",
        personality.persona()
    )
}

fn pick_prompt(candidates: &[&String], journey: &Journey) -> String {
    let numbered = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n");
    let context = if journey.is_empty() {
        "Just starting".to_string()
    } else {
        journey
            .iter()
            .map(|hop| format!("{}: {}", hop.topic, hop.summary))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Available topics to explore next:\n{numbered}\n\n\
Journey so far:\n{context}\n\n\
Pick the most intriguing topic. Return as JSON: {{\"next\": \"chosen topic\", \"reasoning\": \"why\"}}"
    )
}

fn narrate_system(personality: Personality) -> String {
    format!(
        "You are a {}. Write an engaging summary that captures the wonder of discovery \
without being overly casual or using slang.",
        personality.persona()
    )
}

fn narrate_prompt(journey: &Journey) -> String {
    if journey.is_empty() {
        return "This research journey ended before it reached its first stop. \
Write two or three sentences in first person acknowledging that, and invite the reader \
to pick a topic and set off again.\n\n\
Style: Engaging and enthusiastic but professional."
            .to_string();
    }
    let details = journey
        .iter()
        .enumerate()
        .map(|(i, hop)| {
            format!(
                "Stop {}: {}\n- Found: {}\n- Surprise: {}",
                i + 1,
                hop.topic,
                hop.summary,
                hop.surprise
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Write a 150-200 word summary of this research journey:\n\n{details}\n\n\
Style: Engaging and enthusiastic but professional. Show the fascinating connections between topics. \
Write in first person."
    )
}

/// Wraps an `LLMClient` with the walk's prompts and reply validation.
#[derive(Clone)]
pub struct ModelGateway {
    client: Arc<dyn LLMClient>,
    profiles: GatewayProfiles,
}

impl ModelGateway {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            profiles: GatewayProfiles::default(),
        }
    }

    pub fn with_profiles(mut self, profiles: GatewayProfiles) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn profiles(&self) -> &GatewayProfiles {
        &self.profiles
    }

    /// Researches `topic`, steering offramps away from `visited`.
    pub async fn explore(
        &self,
        topic: &str,
        personality: Personality,
        visited: &VisitedSet,
    ) -> Result<Exploration> {
        let request = CompletionRequest {
            system: explore_system(personality),
            prompt: explore_prompt(topic, visited),
            json_output: true,
            profile: self.profiles.explore.clone(),
        };
        let completion = self.client.complete(request).await?;
        debug!(
            topic,
            reply_len = completion.text.len(),
            sources = completion.sources.len(),
            "Explore reply received"
        );
        parse_exploration(&completion.text, completion.sources)
    }

    /// Chooses the next topic among the unvisited `offramps`.
    ///
    /// When every offramp has been visited this returns a dead end without
    /// calling the model.
    pub async fn pick_next(
        &self,
        offramps: &[String],
        visited: &VisitedSet,
        personality: Personality,
        journey: &Journey,
    ) -> Result<PickOutcome> {
        let candidates: Vec<&String> = offramps.iter().filter(|o| !visited.contains(o)).collect();
        if candidates.is_empty() {
            return Ok(PickOutcome::dead_end());
        }

        let request = CompletionRequest {
            system: pick_system(personality),
            prompt: pick_prompt(&candidates, journey),
            json_output: true,
            profile: self.profiles.pick.clone(),
        };
        let completion = self.client.complete(request).await?;
        debug!(
            candidates = candidates.len(),
            reply_len = completion.text.len(),
            "Pick reply received"
        );
        parse_pick(&completion.text, &candidates)
    }

    /// Starts narrating the journey. Fragments arrive as the model produces them.
    pub async fn narrate(&self, journey: &Journey, personality: Personality) -> Result<LLMStream> {
        let request = CompletionRequest {
            system: narrate_system(personality),
            prompt: narrate_prompt(journey),
            json_output: false,
            profile: self.profiles.narrate.clone(),
        };
        self.client.stream(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journey::Hop;
    use crate::llm_client::{Completion, MockLLMClient};
    use futures::StreamExt;

    const EXPLORE_OK: &str = r#"{"summary": "Rockets are old.", "surprise": "The Chinese flew them in 1232.", "offramps": ["Moon", "Stars", "Gunpowder", "Kites", "Tea"]}"#;

    fn gateway(mock: MockLLMClient) -> ModelGateway {
        ModelGateway::new(Arc::new(mock))
    }

    fn visited(topics: &[&str]) -> VisitedSet {
        let mut set = VisitedSet::new();
        for t in topics {
            set.insert(t);
        }
        set
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```\n"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_explore_parses_reply_and_keeps_sources() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(|req| {
                req.json_output
                    && req.prompt.contains("Research this topic: \"Space Travel\"")
                    && req.prompt.contains("avoid suggesting these as offramps): none")
                    && req.system.starts_with("You are a curious generalist")
                    && req.profile.web_search
                    && req.profile.thinking_budget == Some(0)
            })
            .times(1)
            .returning(|_| {
                Ok(Completion {
                    text: format!("```json\n{}\n```", EXPLORE_OK),
                    sources: vec!["https://example.com/rockets".to_string()],
                })
            });

        let exploration = gateway(mock)
            .explore("Space Travel", Personality::CuriousGeneralist, &VisitedSet::new())
            .await
            .unwrap();

        assert_eq!(exploration.summary, "Rockets are old.");
        assert_eq!(exploration.offramps.len(), 5);
        assert_eq!(exploration.offramps[0], "Moon");
        assert_eq!(exploration.sources, vec!["https://example.com/rockets"]);
    }

    #[tokio::test]
    async fn test_explore_lists_visited_topics() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(|req| req.prompt.contains("offramps): Space Travel, Moon"))
            .returning(|_| Ok(Completion::text(EXPLORE_OK)));

        let result = gateway(mock)
            .explore("Stars", Personality::ScienceGeek, &visited(&["Space Travel", "Moon"]))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_explore_rejects_invalid_json() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .returning(|_| Ok(Completion::text("Sure! Here are some facts about rockets.")));

        let err = gateway(mock)
            .explore("Space Travel", Personality::Foodie, &VisitedSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_explore_rejects_schema_violations() {
        let bad_replies = [
            r#"{"summary": "", "surprise": "x", "offramps": ["a"]}"#,
            r#"{"summary": "x", "surprise": "  ", "offramps": ["a"]}"#,
            r#"{"summary": "x", "surprise": "y"}"#,
            r#"{"summary": "x", "surprise": "y", "offramps": "Moon"}"#,
            r#"{"summary": "x", "surprise": "y", "offramps": ["Moon", ""]}"#,
            r#"["x", "y"]"#,
        ];
        for reply in bad_replies {
            let mut mock = MockLLMClient::new();
            mock.expect_complete()
                .returning(move |_| Ok(Completion::text(reply)));
            let err = gateway(mock)
                .explore("Tea", Personality::Foodie, &VisitedSet::new())
                .await
                .unwrap_err();
            assert!(
                matches!(err, Error::MalformedResponse(_)),
                "expected MalformedResponse for {}",
                reply
            );
        }
    }

    #[tokio::test]
    async fn test_explore_propagates_upstream_errors() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .returning(|_| Err(Error::UpstreamUnavailable("503".to_string())));

        let err = gateway(mock)
            .explore("Tea", Personality::Foodie, &VisitedSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_pick_dead_end_makes_no_model_call() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete().times(0);

        let outcome = gateway(mock)
            .pick_next(
                &strings(&["space travel", "MOON"]),
                &visited(&["Space Travel", "Moon"]),
                Personality::ChaosGoblin,
                &Journey::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, PickOutcome::dead_end());
        assert_eq!(outcome.reasoning, DEAD_END_REASONING);
    }

    #[tokio::test]
    async fn test_pick_offers_only_unvisited_candidates() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(|req| {
                req.prompt.contains("1. Moon\n2. Stars")
                    && !req.prompt.contains("Space Travel")
                    && req.prompt.contains("Just starting")
                    && !req.profile.web_search
            })
            .times(1)
            .returning(|_| {
                Ok(Completion::text(
                    r#"{"next": "Stars", "reasoning": "Stars outshine moons."}"#,
                ))
            });

        let outcome = gateway(mock)
            .pick_next(
                &strings(&["Space Travel", "Moon", "Stars"]),
                &visited(&["Space Travel"]),
                Personality::CuriousGeneralist,
                &Journey::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.next.as_deref(), Some("Stars"));
        assert_eq!(outcome.reasoning, "Stars outshine moons.");
    }

    #[tokio::test]
    async fn test_pick_includes_journey_context() {
        let mut journey = Journey::new();
        journey.push(Hop {
            topic: "Space Travel".into(),
            summary: "Rockets are old.".into(),
            surprise: "1232".into(),
            offramps: strings(&["Moon"]),
            chosen_next: Some("Moon".into()),
            reasoning: "why not".into(),
            sources: vec![],
        });

        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(|req| req.prompt.contains("Space Travel: Rockets are old."))
            .returning(|_| Ok(Completion::text(r#"{"next": "tides", "reasoning": "pull"}"#)));

        let outcome = gateway(mock)
            .pick_next(
                &strings(&["Tides"]),
                &visited(&["Space Travel", "Moon"]),
                Personality::CuriousGeneralist,
                &journey,
            )
            .await
            .unwrap();

        // The candidate's own spelling wins over the model's.
        assert_eq!(outcome.next.as_deref(), Some("Tides"));
    }

    #[tokio::test]
    async fn test_pick_rejects_choice_outside_candidates() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete().returning(|_| {
            Ok(Completion::text(
                r#"{"next": "Space Travel", "reasoning": "loop back"}"#,
            ))
        });

        let err = gateway(mock)
            .pick_next(
                &strings(&["Space Travel", "Moon"]),
                &visited(&["Space Travel"]),
                Personality::CuriousGeneralist,
                &Journey::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_pick_schema() {
        let cases = [
            (r#"{"next": null, "reasoning": "nothing grabs me"}"#, true),
            (r#"{"reasoning": "no next key"}"#, false),
            (r#"{"next": "Moon"}"#, false),
            (r#"{"next": "Moon", "reasoning": ""}"#, false),
            (r#"{"next": 3, "reasoning": "numbers"}"#, false),
        ];
        for (reply, ok) in cases {
            let mut mock = MockLLMClient::new();
            mock.expect_complete()
                .returning(move |_| Ok(Completion::text(reply)));
            let result = gateway(mock)
                .pick_next(
                    &strings(&["Moon"]),
                    &VisitedSet::new(),
                    Personality::Foodie,
                    &Journey::new(),
                )
                .await;
            assert_eq!(result.is_ok(), ok, "unexpected outcome for {}", reply);
            match result {
                Ok(outcome) => assert_eq!(outcome.next, None),
                Err(err) => assert!(matches!(err, Error::MalformedResponse(_))),
            }
        }
    }

    #[tokio::test]
    async fn test_pick_model_may_stop_with_candidates_left() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete().times(1).returning(|_| {
            Ok(Completion::text(
                r#"{"next": null, "reasoning": "Nothing here beats the moon."}"#,
            ))
        });

        let outcome = gateway(mock)
            .pick_next(
                &strings(&["Moon", "Stars"]),
                &visited(&["Space Travel"]),
                Personality::ScienceGeek,
                &Journey::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.next, None);
        assert_eq!(outcome.reasoning, "Nothing here beats the moon.");
        assert_ne!(outcome.reasoning, DEAD_END_REASONING);
    }

    #[tokio::test]
    async fn test_narrate_streams_with_narration_profile() {
        let mut mock = MockLLMClient::new();
        mock.expect_stream()
            .withf(|req| {
                !req.json_output
                    && req.profile.temperature == Some(1.4)
                    && req.prompt.contains("ended before it reached its first stop")
            })
            .times(1)
            .returning(|_| {
                let stream: LLMStream = Box::pin(futures::stream::iter(vec![
                    Ok("I set ".to_string()),
                    Ok("off.".to_string()),
                ]));
                Ok(stream)
            });

        let stream = gateway(mock)
            .narrate(&Journey::new(), Personality::HistoryNerd)
            .await
            .unwrap();
        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments, vec!["I set ", "off."]);
    }

    #[test]
    fn test_narrate_prompt_lists_stops() {
        let mut journey = Journey::new();
        for topic in ["Tea", "Clipper Ships"] {
            journey.push(Hop {
                topic: topic.into(),
                summary: format!("{} summary", topic),
                surprise: format!("{} surprise", topic),
                offramps: vec![],
                chosen_next: None,
                reasoning: String::new(),
                sources: vec![],
            });
        }
        let prompt = narrate_prompt(&journey);
        assert!(prompt.contains("Stop 1: Tea\n- Found: Tea summary\n- Surprise: Tea surprise"));
        assert!(prompt.contains("Stop 2: Clipper Ships"));
        assert!(prompt.contains("150-200 word"));
    }
}
