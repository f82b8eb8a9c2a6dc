//! Minister mode: a fixed, sequential reasoning chain.
//!
//! | Step | Input | Output |
//! |------|-------|--------|
//! | `search` | query + retrieved passages | cited findings |
//! | `frame` | query + findings | framework analysis |
//! | `challenge` | query + findings + framing | red-team critique |
//! | `search-web` | query + Tavily results | recent developments (optional) |
//! | `combine` | everything above | final answer |
//!
//! Every step is one gateway call on the reasoning tier. The first failure
//! aborts the chain.

use serde::Serialize;

use crate::error::HubError;
use crate::llm::{ChatMessage, Completion, CompletionRequest, LlmGateway, ModelTier};
use crate::prompts::{self, fill};
use crate::web::{self, WebSearch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Search,
    Frame,
    Challenge,
    SearchWeb,
    Combine,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Search => "search",
            Step::Frame => "frame",
            Step::Challenge => "challenge",
            Step::SearchWeb => "search-web",
            Step::Combine => "combine",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutput {
    pub step: Step,
    pub content: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct MinisterOutcome {
    /// The `combine` step's completion.
    pub answer: Completion,
    /// Every step in execution order, `combine` included.
    pub steps: Vec<StepOutput>,
}

pub struct MinisterChain<'a> {
    gateway: &'a dyn LlmGateway,
    web: Option<&'a dyn WebSearch>,
    max_web_results: usize,
    model: Option<String>,
}

impl<'a> MinisterChain<'a> {
    pub fn new(gateway: &'a dyn LlmGateway) -> Self {
        Self {
            gateway,
            web: None,
            max_web_results: 5,
            model: None,
        }
    }

    /// Enables the web step. Pass `None` to leave it skipped.
    pub fn with_web(mut self, web: Option<&'a dyn WebSearch>, max_results: usize) -> Self {
        self.web = web;
        self.max_web_results = max_results;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub async fn run(&self, query: &str, context: &str) -> Result<MinisterOutcome, HubError> {
        let mut steps = Vec::with_capacity(5);

        let findings = self
            .step(Step::Search, fill(prompts::MINISTER_SEARCH, &[("query", query), ("context", context)]))
            .await?;
        steps.push(findings.clone());

        let framing = self
            .step(
                Step::Frame,
                fill(
                    prompts::MINISTER_FRAME,
                    &[("query", query), ("findings", &findings.content)],
                ),
            )
            .await?;
        steps.push(framing.clone());

        let challenge = self
            .step(
                Step::Challenge,
                fill(
                    prompts::MINISTER_CHALLENGE,
                    &[
                        ("query", query),
                        ("findings", &findings.content),
                        ("framing", &framing.content),
                    ],
                ),
            )
            .await?;
        steps.push(challenge.clone());

        let web_summary = match self.web {
            Some(web) => {
                let results = web
                    .search(query, self.max_web_results)
                    .await
                    .map_err(HubError::WebSearch)?;
                let out = self
                    .step(
                        Step::SearchWeb,
                        fill(
                            prompts::MINISTER_WEB,
                            &[("query", query), ("results", &web::format_results(&results))],
                        ),
                    )
                    .await?;
                steps.push(out.clone());
                out.content
            }
            None => {
                tracing::debug!("minister web step skipped");
                prompts::WEB_SKIPPED.to_string()
            }
        };

        let prompt = fill(
            prompts::MINISTER_COMBINE,
            &[
                ("query", query),
                ("findings", &findings.content),
                ("framing", &framing.content),
                ("challenge", &challenge.content),
                ("web", &web_summary),
            ],
        );
        let answer = self.call(prompt).await?;
        steps.push(StepOutput {
            step: Step::Combine,
            content: answer.content.clone(),
            model: answer.model.clone(),
        });

        Ok(MinisterOutcome { answer, steps })
    }

    async fn step(&self, step: Step, prompt: String) -> Result<StepOutput, HubError> {
        tracing::debug!("minister step {}", step.as_str());
        let c = self.call(prompt).await?;
        Ok(StepOutput {
            step,
            content: c.content,
            model: c.model,
        })
    }

    async fn call(&self, prompt: String) -> Result<Completion, HubError> {
        let req = CompletionRequest::new(
            ModelTier::Reasoning,
            vec![
                ChatMessage::system(prompts::MINISTER_SYSTEM),
                ChatMessage::user(prompt),
            ],
        )
        .temperature(0.7)
        .model(self.model.clone());
        Ok(self.gateway.complete(req).await?)
    }
}
