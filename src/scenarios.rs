//! The bundled pipelines.
//!
//! Every scenario is a [`PipelineSpec`]: the same turn mechanism with
//! different prompts, turn counts and token budgets. Turn one never sees
//! earlier conversation; later turns build on everything before them, and
//! the final turn of each gets a larger budget for the long-form answer.
//!
//! | Pipeline | Input field |
//! |---|---|
//! | [`blog_post`] | `novel` |
//! | [`trip_planner`] | `location` |
//! | [`story_writer`] | `story_description` |
//! | [`movie_pitch`] | `movie_description` |
//! | [`meal_planner`] | `ingredients` |

use crate::builder::PromptSpec;
use crate::pipeline::{Pipeline, PipelineAssembler, PipelineSpec};
use crate::workflow::WorkflowRuntime;
use crate::Result;

/// Registered name of [`blog_post`].
pub const BLOG_POST: &str = "PromptChainDemo-BlogPost";
/// Registered name of [`trip_planner`].
pub const TRIP_PLANNER: &str = "PromptChainDemo-TripPlanner";
/// Registered name of [`story_writer`].
pub const STORY_WRITER: &str = "PromptChainDemo-StoryWriter";
/// Registered name of [`movie_pitch`].
pub const MOVIE_PITCH: &str = "PromptChainDemo-MoviePitch";
/// Registered name of [`meal_planner`].
pub const MEAL_PLANNER: &str = "PromptChainDemo-MealPlanner";

fn opening(template: &str) -> Result<PromptSpec> {
    Ok(PromptSpec::new(template)?.without_conversation())
}

fn follow_up(template: &str) -> Result<PromptSpec> {
    PromptSpec::new(template)
}

/// A literature review of `novel` in five turns.
pub fn blog_post() -> Result<PipelineSpec> {
    Ok(PipelineSpec::new(BLOG_POST)
        .turn(
            "Write a Summary",
            opening("Write a 1-2 sentence summary for the book {novel}.")?,
        )
        .turn(
            "Describe the Plot",
            follow_up("Write a paragraph describing the plot of the book {novel}.")?,
        )
        .turn(
            "Analyze Key Themes",
            follow_up("Write a paragraph analyzing the key themes of the book {novel}.")?,
        )
        .turn(
            "Analyze Writing Style",
            follow_up("Write a paragraph discussing the writing style and tone of the book {novel}.")?,
        )
        .turn(
            "Write the Blog Post",
            follow_up(concat!(
                "Combine your previous responses into a blog post titled \"{novel} - A Literature Review\" for my literature blog. ",
                "Start the blog post with an introductory paragraph at the beginning and a conclusion paragraph at the end. ",
                "The blog post should be five paragraphs in total."
            ))?
            .with_max_tokens(1000),
        ))
}

/// A weekend itinerary for `location`.
pub fn trip_planner() -> Result<PipelineSpec> {
    Ok(PipelineSpec::new(TRIP_PLANNER)
        .turn(
            "Suggest Hotels",
            opening("List three hotels in {location} suitable for a weekend visit, one sentence each.")?,
        )
        .turn(
            "Suggest Restaurants",
            follow_up("List five restaurants in {location} within walking distance of those hotels, one sentence each.")?,
        )
        .turn(
            "Suggest Activities",
            follow_up("List five activities a visitor should not miss in {location}, one sentence each.")?,
        )
        .turn(
            "Write the Itinerary",
            follow_up(concat!(
                "Using your previous suggestions, write a day-by-day itinerary for a weekend trip to {location}. ",
                "Choose one hotel and include a restaurant for every meal."
            ))?
            .with_max_tokens(1500),
        ))
}

/// A short story built from `story_description`.
pub fn story_writer() -> Result<PipelineSpec> {
    Ok(PipelineSpec::new(STORY_WRITER)
        .turn(
            "Create Characters",
            opening("Describe the main characters of a short story about {story_description}.")?,
        )
        .turn(
            "Create the Setting",
            follow_up("Describe the setting where these characters live.")?,
        )
        .turn(
            "Outline the Plot",
            follow_up("Outline the beginning, middle and end of the story in three short paragraphs.")?,
        )
        .turn(
            "Write the Story",
            follow_up("Write the complete short story, using the characters, setting and outline above.")?
                .with_max_tokens(2000),
        ))
}

/// A movie pitch for `movie_description`. The pitch itself is sampled cooler.
pub fn movie_pitch() -> Result<PipelineSpec> {
    Ok(PipelineSpec::new(MOVIE_PITCH)
        .turn(
            "Brainstorm Titles",
            opening("Suggest five titles for a movie about {movie_description}.")?,
        )
        .turn(
            "Write the Logline",
            follow_up("Pick the strongest title and write a one-sentence logline for it.")?,
        )
        .turn(
            "Write the Pitch",
            follow_up("Write a one-page pitch for the movie, ending with why audiences will love it.")?
                .with_max_tokens(1000)
                .with_temperature(0.7),
        ))
}

/// A day of meals using `ingredients`.
pub fn meal_planner() -> Result<PipelineSpec> {
    Ok(PipelineSpec::new(MEAL_PLANNER)
        .turn(
            "Suggest Dishes",
            opening("Suggest three dishes that use these ingredients: {ingredients}.")?,
        )
        .turn(
            "Choose a Menu",
            follow_up("Arrange those dishes into breakfast, lunch and dinner for one day.")?,
        )
        .turn(
            "Write the Recipes",
            follow_up("Write a recipe for each meal in the menu, with ingredient quantities and steps.")?
                .with_max_tokens(1500)
                .with_temperature(0.5),
        ))
}

/// Every bundled pipeline.
pub fn all() -> Result<Vec<PipelineSpec>> {
    Ok(vec![
        blog_post()?,
        trip_planner()?,
        story_writer()?,
        movie_pitch()?,
        meal_planner()?,
    ])
}

/// Assemble and register every bundled pipeline.
pub fn register_all(
    assembler: &PipelineAssembler,
    runtime: &mut WorkflowRuntime<Pipeline>,
) -> Result<()> {
    for spec in all()? {
        assembler.register(runtime, &spec)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::prompt::{AI_PROMPT, HUMAN_PROMPT};
    use crate::service::InvokeResponse;
    use crate::testing::{EchoService, ScriptedService};
    use crate::{ChainBuilder, Error, ExecutionInput, RetryPolicy, WorkflowEvent};

    fn runtime(service: Arc<dyn crate::InferenceService>) -> WorkflowRuntime<Pipeline> {
        let assembler = PipelineAssembler::new(
            ChainBuilder::new(service).with_retry_policy(RetryPolicy::none()),
        );
        let mut runtime = WorkflowRuntime::new();
        register_all(&assembler, &mut runtime).unwrap();
        runtime
    }

    #[test]
    fn every_scenario_assembles_under_a_unique_name() {
        let runtime = runtime(Arc::new(EchoService::default()));
        assert_eq!(
            runtime.names(),
            vec![BLOG_POST, MEAL_PLANNER, MOVIE_PITCH, STORY_WRITER, TRIP_PLANNER]
        );
        for spec in all().unwrap() {
            assert!(!spec.turns[0].prompt.include_previous_conversation, "{}", spec.name);
            assert_eq!(spec.required_inputs().len(), 1, "{}", spec.name);
        }
    }

    #[test]
    fn registering_twice_is_rejected() {
        let assembler = PipelineAssembler::new(ChainBuilder::new(Arc::new(EchoService::default())));
        let mut runtime = WorkflowRuntime::new();
        assembler.register(&mut runtime, &blog_post().unwrap()).unwrap();
        let err = assembler.register(&mut runtime, &blog_post().unwrap()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn blog_post_for_dune() {
        let service = Arc::new(ScriptedService::new(vec![
            Ok(InvokeResponse::completion("Dune follows...")),
            Ok(InvokeResponse::completion("plot")),
            Ok(InvokeResponse::completion("themes")),
            Ok(InvokeResponse::completion("style")),
            Ok(InvokeResponse::completion("Dune - A Literature Review ...")),
        ]));
        let runtime = runtime(service.clone());
        let (answer, _) = runtime
            .execute(BLOG_POST, ExecutionInput::new().with("novel", "Dune"))
            .await
            .unwrap();
        assert_eq!(answer, "Dune - A Literature Review ...");

        let requests = service.requests();
        assert_eq!(requests.len(), 5);
        let turn1 = "\n\nHuman:Write a 1-2 sentence summary for the book Dune.\n\nAssistant:";
        assert_eq!(requests[0].body.prompt, turn1);
        assert_eq!(
            requests[1].body.prompt,
            format!(
                "{turn1}Dune follows...{HUMAN_PROMPT}Write a paragraph describing the plot of the book Dune.{AI_PROMPT}"
            )
        );
        assert!(requests[4]
            .body
            .prompt
            .contains("titled \"Dune - A Literature Review\""));
        assert_eq!(requests[4].body.max_tokens_to_sample, 1000);
        assert!(requests[..4].iter().all(|r| r.body.max_tokens_to_sample == 250));
        assert!(requests.iter().all(|r| r.model_id == "anthropic.claude-instant-v1"));
    }

    #[tokio::test]
    async fn concurrent_executions_are_isolated() {
        let service = Arc::new(EchoService {
            delay: Duration::from_millis(2),
        });
        let runtime = runtime(service);
        let workflow = runtime.get(BLOG_POST).unwrap();

        let run = |novel: &'static str| {
            let workflow = Arc::clone(&workflow);
            tokio::spawn(async move {
                let ctx = crate::ExecutionContext::new(ExecutionInput::new().with("novel", novel));
                let answer = workflow.run_with_ctx(&ctx).await.unwrap();
                let responses: Vec<String> = ctx
                    .trace_snapshot()
                    .into_iter()
                    .filter_map(|t| match t.event {
                        WorkflowEvent::Artifact { data, .. } => data.as_str().map(String::from),
                        _ => None,
                    })
                    .collect();
                (answer, responses)
            })
        };

        let (dune, emma) = tokio::join!(run("Dune"), run("Emma"));
        let (dune_answer, dune_responses) = dune.unwrap();
        let (emma_answer, emma_responses) = emma.unwrap();

        assert!(dune_answer.contains("\"Dune - A Literature Review\""));
        assert!(emma_answer.contains("\"Emma - A Literature Review\""));
        assert_eq!(dune_responses.len(), 5);
        assert!(dune_responses.iter().all(|r| !r.contains("Emma")));
        assert!(emma_responses.iter().all(|r| !r.contains("Dune")));
    }

    #[tokio::test]
    async fn execute_all_runs_each_input() {
        let runtime = runtime(Arc::new(EchoService::default()));
        let results = runtime
            .execute_all(
                TRIP_PLANNER,
                vec![
                    ExecutionInput::new().with("location", "Lisbon"),
                    ExecutionInput::new(),
                    ExecutionInput::new().with("location", "Kyoto"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].as_ref().unwrap().0.contains("Lisbon"));
        assert!(matches!(results[1], Err(Error::MissingInput(_))));
        assert!(results[2].as_ref().unwrap().0.contains("Kyoto"));
    }

    #[tokio::test]
    async fn unknown_workflow() {
        let runtime = runtime(Arc::new(EchoService::default()));
        let err = runtime
            .execute("missing", ExecutionInput::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownWorkflow(_)));
    }
}
