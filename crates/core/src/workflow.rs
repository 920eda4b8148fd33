//! The dispatch workflow: an explicit state machine executed exactly once
//! per turn.
//!
//! `START → ROUTE → {INVOKE | DIRECT} → ASSEMBLE → END`, with no loop back
//! to `ROUTE`. Multi-step capability chaining within one turn is not
//! supported; a follow-up user message starts a fresh evaluation over the
//! accumulated history.

use std::sync::Arc;

use tracing::{info, warn};

use crate::conversation::{ConversationState, DIRECT_ORIGIN, assemble};
use crate::error::TurnError;
use crate::generation::{Decision, GenerationClient};
use crate::prompts;
use crate::registry::CapabilityRegistry;
use crate::retrieval::Retriever;

/// Orchestrates one turn over the read-only registry and the two stateless
/// adapters. Callers must serialize turns per conversation; across
/// different conversations the workflow is freely shareable.
pub struct TurnWorkflow {
    registry: Arc<CapabilityRegistry>,
    generation: Arc<dyn GenerationClient>,
    retriever: Arc<dyn Retriever>,
}

impl TurnWorkflow {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        generation: Arc<dyn GenerationClient>,
        retriever: Arc<dyn Retriever>,
    ) -> Self {
        Self { registry, generation, retriever }
    }

    /// Runs one full turn and returns the updated state plus the response
    /// text. The input state is not modified: on error the caller still
    /// holds the clean pre-turn state, so a retried turn starts fresh.
    pub async fn process_turn(
        &self,
        state: &ConversationState,
        user_text: &str,
    ) -> Result<(ConversationState, String), TurnError> {
        let mut working = state.clone();
        working.push_user(user_text);

        match self.route(&working).await {
            Decision::Invoke { capability, argument } => {
                match self.registry.resolve(&capability) {
                    Ok(descriptor) => {
                        info!(capability = %capability, "invoking capability");
                        let output = descriptor
                            .handler()
                            .invoke(&argument, self.retriever.as_ref(), self.generation.as_ref())
                            .await?;
                        working.merge_context(output.context);
                        let text = output.text;
                        let next = assemble(&working, &text, &capability);
                        Ok((next, text))
                    }
                    // Router noise, not a user-facing error: log and answer
                    // directly instead of failing the turn.
                    Err(err) => {
                        warn!(capability = %capability, error = %err, "decision named an unknown capability; degrading to direct");
                        self.direct(working).await
                    }
                }
            }
            Decision::Direct => self.direct(working).await,
        }
    }

    /// ROUTE: one classification call over the full history, retried at
    /// most once. A second failure degrades to a direct response so the
    /// turn always terminates.
    async fn route(&self, working: &ConversationState) -> Decision {
        let specs = self.registry.specs();
        match self.generation.decide(working.messages(), &specs).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(error = %err, "decide failed; retrying once");
                match self.generation.decide(working.messages(), &specs).await {
                    Ok(decision) => decision,
                    Err(err) => {
                        warn!(error = %err, "decide failed twice; degrading to direct response");
                        Decision::Direct
                    }
                }
            }
        }
    }

    /// DIRECT: a conversational completion over the full history, with no
    /// capability side effects. Completion exhaustion here is the only
    /// failure that reaches the caller.
    async fn direct(
        &self,
        working: ConversationState,
    ) -> Result<(ConversationState, String), TurnError> {
        let prompt = prompts::direct_prompt(working.messages());
        let text = self.generation.complete(&prompt).await?;
        let next = assemble(&working, &text, DIRECT_ORIGIN);
        Ok((next, text))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::capabilities;
    use crate::conversation::{Message, Role};
    use crate::error::{GenerationError, RetrievalError};
    use crate::registry::{
        CapabilityDescriptor, CapabilityHandler, CapabilityOutput, CapabilitySpec,
    };
    use crate::retrieval::RetrievedPassage;

    /// Generation double: scripted decide results, echoing complete.
    ///
    /// `complete` returns the prompt it was given, so assertions on the
    /// assembled text exercise prompt construction.
    struct ScriptedGeneration {
        decisions: Mutex<VecDeque<Result<Decision, GenerationError>>>,
        complete_error: Option<GenerationError>,
        decide_calls: AtomicUsize,
        complete_calls: AtomicUsize,
    }

    impl ScriptedGeneration {
        fn deciding(decisions: Vec<Result<Decision, GenerationError>>) -> Self {
            Self {
                decisions: Mutex::new(decisions.into()),
                complete_error: None,
                decide_calls: AtomicUsize::new(0),
                complete_calls: AtomicUsize::new(0),
            }
        }

        fn with_failing_complete(mut self, err: GenerationError) -> Self {
            self.complete_error = Some(err);
            self
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedGeneration {
        async fn decide(
            &self,
            _messages: &[Message],
            _capabilities: &[CapabilitySpec],
        ) -> Result<Decision, GenerationError> {
            self.decide_calls.fetch_add(1, Ordering::SeqCst);
            self.decisions
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted decide exhausted")
        }

        async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
            self.complete_calls.fetch_add(1, Ordering::SeqCst);
            match &self.complete_error {
                Some(err) => Err(err.clone()),
                None => Ok(prompt.to_string()),
            }
        }
    }

    /// Retrieval double that counts calls and records the last query.
    #[derive(Default)]
    struct CountingRetriever {
        passages: Vec<RetrievedPassage>,
        unavailable: bool,
        calls: AtomicUsize,
        last_query: Mutex<Option<(String, usize)>>,
    }

    impl CountingRetriever {
        fn with_passages(passages: Vec<RetrievedPassage>) -> Self {
            Self { passages, ..Self::default() }
        }
    }

    #[async_trait]
    impl Retriever for CountingRetriever {
        async fn fetch(
            &self,
            topic: &str,
            k: usize,
        ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_query.lock().unwrap() = Some((topic.to_string(), k));
            if self.unavailable {
                Err(RetrievalError::Unavailable("connection refused".to_string()))
            } else {
                Ok(self.passages.clone())
            }
        }
    }

    /// Test capability that records invocations.
    struct EchoCapability {
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CapabilityHandler for EchoCapability {
        async fn invoke(
            &self,
            argument: &str,
            _retriever: &dyn Retriever,
            _generation: &dyn GenerationClient,
        ) -> Result<CapabilityOutput, GenerationError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let mut context = BTreeMap::new();
            context.insert(
                "echoed".to_string(),
                serde_json::Value::String(argument.to_string()),
            );
            Ok(CapabilityOutput {
                text: format!("echo:{argument}"),
                context,
            })
        }
    }

    fn echo_registry(invocations: Arc<AtomicUsize>) -> Arc<CapabilityRegistry> {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(CapabilityDescriptor::new(
                "echo",
                "echoes the argument",
                "free text",
                Arc::new(EchoCapability { invocations }),
            ))
            .unwrap();
        Arc::new(registry)
    }

    fn workflow(
        registry: Arc<CapabilityRegistry>,
        generation: Arc<ScriptedGeneration>,
        retriever: Arc<CountingRetriever>,
    ) -> TurnWorkflow {
        TurnWorkflow::new(registry, generation, retriever)
    }

    fn invoke(capability: &str, argument: &str) -> Decision {
        Decision::Invoke {
            capability: capability.to_string(),
            argument: argument.to_string(),
        }
    }

    #[tokio::test]
    async fn direct_decision_performs_no_retrieval() {
        let generation = Arc::new(ScriptedGeneration::deciding(vec![Ok(Decision::Direct)]));
        let retriever = Arc::new(CountingRetriever::default());
        let wf = workflow(
            echo_registry(Arc::new(AtomicUsize::new(0))),
            Arc::clone(&generation),
            Arc::clone(&retriever),
        );

        let state = ConversationState::new("u-1");
        let (next, text) = wf.process_turn(&state, "我想學習英文，從何開始？").await.unwrap();

        assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
        assert_eq!(generation.complete_calls.load(Ordering::SeqCst), 1);
        let last = next.messages().last().unwrap();
        assert_eq!(last.origin.as_deref(), Some(DIRECT_ORIGIN));
        assert_eq!(last.content, text);
        // Input state untouched.
        assert!(state.messages().is_empty());
    }

    #[tokio::test]
    async fn invoke_runs_exactly_one_handler_and_stamps_origin() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let generation =
            Arc::new(ScriptedGeneration::deciding(vec![Ok(invoke("echo", "hello"))]));
        let retriever = Arc::new(CountingRetriever::default());
        let wf = workflow(
            echo_registry(Arc::clone(&invocations)),
            Arc::clone(&generation),
            retriever,
        );

        let state = ConversationState::new("u-1");
        let (next, text) = wf.process_turn(&state, "echo hello").await.unwrap();

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(text, "echo:hello");
        let last = next.messages().last().unwrap();
        assert_eq!(last.origin.as_deref(), Some("echo"));
        // Handler context merged by the workflow, not by the handler.
        assert_eq!(
            next.context()["echoed"],
            serde_json::Value::String("hello".to_string())
        );
        assert!(state.context().is_empty());
    }

    #[tokio::test]
    async fn unknown_capability_behaves_like_direct() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let generation =
            Arc::new(ScriptedGeneration::deciding(vec![Ok(invoke("nonexistent", "x"))]));
        let retriever = Arc::new(CountingRetriever::default());
        let wf = workflow(
            echo_registry(Arc::clone(&invocations)),
            Arc::clone(&generation),
            Arc::clone(&retriever),
        );

        let state = ConversationState::new("u-1");
        let (next, _text) = wf.process_turn(&state, "do the thing").await.unwrap();

        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
        assert_eq!(generation.complete_calls.load(Ordering::SeqCst), 1);
        let last = next.messages().last().unwrap();
        assert_eq!(last.origin.as_deref(), Some(DIRECT_ORIGIN));
    }

    #[tokio::test]
    async fn decide_failure_retries_once_then_succeeds() {
        let generation = Arc::new(ScriptedGeneration::deciding(vec![
            Err(GenerationError::Timeout("deadline".to_string())),
            Ok(Decision::Direct),
        ]));
        let retriever = Arc::new(CountingRetriever::default());
        let wf = workflow(
            echo_registry(Arc::new(AtomicUsize::new(0))),
            Arc::clone(&generation),
            retriever,
        );

        let state = ConversationState::new("u-1");
        wf.process_turn(&state, "hello").await.unwrap();

        assert_eq!(generation.decide_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn double_decide_failure_degrades_to_direct_over_full_history() {
        let generation = Arc::new(ScriptedGeneration::deciding(vec![
            Err(GenerationError::Timeout("deadline".to_string())),
            Err(GenerationError::Timeout("deadline".to_string())),
        ]));
        let retriever = Arc::new(CountingRetriever::default());
        let wf = workflow(
            echo_registry(Arc::new(AtomicUsize::new(0))),
            Arc::clone(&generation),
            retriever,
        );

        let history = vec![
            Message::user("給我一個高深的單字"),
            Message::assistant("ephemeral", DIRECT_ORIGIN),
        ];
        let state = ConversationState::from_history("u-1", history);
        let (next, text) = wf.process_turn(&state, "再給一個例句").await.unwrap();

        // Turn neither hangs nor crashes: response assembled via DIRECT.
        assert_eq!(generation.decide_calls.load(Ordering::SeqCst), 2);
        assert_eq!(generation.complete_calls.load(Ordering::SeqCst), 1);
        assert_eq!(next.messages().len(), 4);
        assert_eq!(next.messages().last().unwrap().role, Role::Assistant);
        // The echoed prompt carries the accumulated history.
        assert!(text.contains("ephemeral"));
        assert!(text.contains("再給一個例句"));
    }

    #[tokio::test]
    async fn malformed_decision_also_degrades_after_one_retry() {
        let generation = Arc::new(ScriptedGeneration::deciding(vec![
            Err(GenerationError::MalformedDecision("no argument".to_string())),
            Err(GenerationError::MalformedDecision("no argument".to_string())),
        ]));
        let retriever = Arc::new(CountingRetriever::default());
        let wf = workflow(
            echo_registry(Arc::new(AtomicUsize::new(0))),
            Arc::clone(&generation),
            retriever,
        );

        let state = ConversationState::new("u-1");
        let (next, _) = wf.process_turn(&state, "hello").await.unwrap();
        assert_eq!(next.messages().last().unwrap().origin.as_deref(), Some(DIRECT_ORIGIN));
    }

    #[tokio::test]
    async fn complete_exhaustion_fails_the_turn_with_state_untouched() {
        let generation = Arc::new(
            ScriptedGeneration::deciding(vec![Ok(Decision::Direct)])
                .with_failing_complete(GenerationError::RateLimited("429".to_string())),
        );
        let retriever = Arc::new(CountingRetriever::default());
        let wf = workflow(
            echo_registry(Arc::new(AtomicUsize::new(0))),
            generation,
            retriever,
        );

        let state = ConversationState::new("u-1");
        let err = wf.process_turn(&state, "hello").await.unwrap_err();

        assert!(matches!(
            err,
            TurnError::Generation(GenerationError::RateLimited(_))
        ));
        // No partial message appended anywhere the caller can see.
        assert!(state.messages().is_empty());
    }

    #[tokio::test]
    async fn lookup_scenario_assembles_a_card_for_the_word() {
        let generation = Arc::new(ScriptedGeneration::deciding(vec![Ok(invoke(
            capabilities::LOOKUP,
            "innovation",
        ))]));
        let retriever = Arc::new(CountingRetriever::default());
        let registry = Arc::new(capabilities::builtin_registry(1).unwrap());
        let wf = workflow(registry, Arc::clone(&generation), Arc::clone(&retriever));

        let state = ConversationState::new("u-1");
        let (next, text) = wf.process_turn(&state, "查詢單字 innovation").await.unwrap();

        // Lookup needs only the generation adapter.
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
        assert_eq!(generation.complete_calls.load(Ordering::SeqCst), 1);
        assert!(text.contains("innovation"));
        let last = next.messages().last().unwrap();
        assert_eq!(last.origin.as_deref(), Some(capabilities::LOOKUP));
    }

    #[tokio::test]
    async fn topic_list_scenario_uses_retrieved_passages() {
        let generation = Arc::new(ScriptedGeneration::deciding(vec![Ok(invoke(
            capabilities::TOPIC_LIST,
            "商業",
        ))]));
        let retriever = Arc::new(CountingRetriever::with_passages(vec![RetrievedPassage {
            content: "商業單字：market, revenue, strategy".to_string(),
            metadata: BTreeMap::new(),
        }]));
        let registry = Arc::new(capabilities::builtin_registry(1).unwrap());
        let wf = workflow(registry, Arc::clone(&generation), Arc::clone(&retriever));

        let state = ConversationState::new("u-1");
        let (next, text) = wf.process_turn(&state, "列出商業相關單字").await.unwrap();

        assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *retriever.last_query.lock().unwrap(),
            Some(("商業".to_string(), 1))
        );
        // The completion prompt (echoed back) carries the passages.
        assert!(text.contains("market, revenue, strategy"));
        let last = next.messages().last().unwrap();
        assert_eq!(last.origin.as_deref(), Some(capabilities::TOPIC_LIST));
        assert!(next.context().contains_key("last_passages"));
    }

    #[tokio::test]
    async fn quiz_scenario_with_empty_retrieval_still_answers() {
        let generation = Arc::new(ScriptedGeneration::deciding(vec![Ok(invoke(
            capabilities::QUIZ,
            "科技",
        ))]));
        let retriever = Arc::new(CountingRetriever::default());
        let registry = Arc::new(capabilities::builtin_registry(1).unwrap());
        let wf = workflow(registry, Arc::clone(&generation), Arc::clone(&retriever));

        let state = ConversationState::new("u-1");
        let (next, text) = wf.process_turn(&state, "生成科技主題測驗").await.unwrap();

        assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);
        assert!(!text.is_empty());
        assert_eq!(
            next.context()["retrieval_degraded"],
            serde_json::Value::Bool(true)
        );
    }
}
