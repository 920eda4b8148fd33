//! The built-in capability set: word lookup, topic vocabulary, and quiz
//! generation. topic-list and quiz lean on the retrieval adapter and fall
//! back to general-knowledge completions when it has nothing to offer.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{GenerationError, RegistryError};
use crate::generation::GenerationClient;
use crate::prompts;
use crate::registry::{
    CapabilityDescriptor, CapabilityHandler, CapabilityOutput, CapabilityRegistry,
};
use crate::retrieval::{RetrievedPassage, Retriever};

pub const LOOKUP: &str = "lookup";
pub const TOPIC_LIST: &str = "topic-list";
pub const QUIZ: &str = "quiz";

/// Builds the registry of built-in capabilities. `search_k` is the number
/// of passages topic-list and quiz request per retrieval call.
pub fn builtin_registry(search_k: usize) -> Result<CapabilityRegistry, RegistryError> {
    let mut registry = CapabilityRegistry::new();
    registry.register(CapabilityDescriptor::new(
        LOOKUP,
        "查詢單個英文單字或片語的詳細資訊：中文意思、詞性、例句、相關詞彙與使用建議。\
         例如「查詢單字 resilient」、「innovation 是什麼意思」。",
        "要查詢的英文單字或片語",
        Arc::new(LookupHandler),
    ))?;
    registry.register(CapabilityDescriptor::new(
        TOPIC_LIST,
        "列出特定主題或領域的相關英文單字（商業、科技、醫療等）。\
         只問單一單字時不要使用。例如「列出商業相關單字」、「我想學習醫療領域的詞彙」。",
        "主題或領域名稱",
        Arc::new(TopicListHandler { search_k }),
    ))?;
    registry.register(CapabilityDescriptor::new(
        QUIZ,
        "生成特定主題的英文單字測驗。只問單一單字時不要使用。\
         例如「生成商業英文測驗」、「幫我出一份科技主題的單字測驗」。",
        "測驗主題或領域名稱",
        Arc::new(QuizHandler { search_k }),
    ))?;
    Ok(registry)
}

/// Single-word teaching card; needs only the generation adapter.
pub struct LookupHandler;

#[async_trait]
impl CapabilityHandler for LookupHandler {
    async fn invoke(
        &self,
        argument: &str,
        _retriever: &dyn Retriever,
        generation: &dyn GenerationClient,
    ) -> Result<CapabilityOutput, GenerationError> {
        info!(word = argument, "lookup capability invoked");
        let text = generation.complete(&prompts::word_card(argument)).await?;
        Ok(CapabilityOutput::text(text))
    }
}

/// Category vocabulary listing backed by retrieval.
pub struct TopicListHandler {
    pub search_k: usize,
}

#[async_trait]
impl CapabilityHandler for TopicListHandler {
    async fn invoke(
        &self,
        argument: &str,
        retriever: &dyn Retriever,
        generation: &dyn GenerationClient,
    ) -> Result<CapabilityOutput, GenerationError> {
        info!(category = argument, "topic-list capability invoked");
        match passages_for(argument, self.search_k, retriever).await {
            Some(passages) => {
                let context = join_passages(&passages);
                let text = generation
                    .complete(&prompts::category_list(argument, &context))
                    .await?;
                Ok(output_with_passages(text, argument, &passages))
            }
            None => {
                let text = generation.complete(&prompts::category_fallback(argument)).await?;
                Ok(degraded_output(text))
            }
        }
    }
}

/// Vocabulary quiz generation backed by retrieval.
pub struct QuizHandler {
    pub search_k: usize,
}

#[async_trait]
impl CapabilityHandler for QuizHandler {
    async fn invoke(
        &self,
        argument: &str,
        retriever: &dyn Retriever,
        generation: &dyn GenerationClient,
    ) -> Result<CapabilityOutput, GenerationError> {
        info!(category = argument, "quiz capability invoked");
        match passages_for(argument, self.search_k, retriever).await {
            Some(passages) => {
                let context = join_passages(&passages);
                let text = generation.complete(&prompts::quiz(&context)).await?;
                Ok(output_with_passages(text, argument, &passages))
            }
            None => {
                let text = generation.complete(&prompts::quiz_fallback(argument)).await?;
                Ok(degraded_output(text))
            }
        }
    }
}

/// Fetches passages for a topic. `None` means the handler should degrade
/// to a general-knowledge completion: either nothing cleared the relevance
/// threshold, or the retrieval service is unreachable (non-fatal).
async fn passages_for(
    topic: &str,
    k: usize,
    retriever: &dyn Retriever,
) -> Option<Vec<RetrievedPassage>> {
    match retriever.fetch(topic, k).await {
        Ok(passages) if !passages.is_empty() => Some(passages),
        Ok(_) => {
            info!(topic, "no passages above relevance threshold; degrading");
            None
        }
        Err(err) => {
            warn!(topic, error = %err, "retrieval unavailable; degrading");
            None
        }
    }
}

fn join_passages(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn output_with_passages(text: String, topic: &str, passages: &[RetrievedPassage]) -> CapabilityOutput {
    let mut context = BTreeMap::new();
    context.insert("last_topic".to_string(), Value::String(topic.to_string()));
    context.insert(
        "last_passages".to_string(),
        Value::Array(
            passages
                .iter()
                .map(|p| Value::String(p.content.clone()))
                .collect(),
        ),
    );
    CapabilityOutput { text, context }
}

fn degraded_output(text: String) -> CapabilityOutput {
    let mut context = BTreeMap::new();
    context.insert("retrieval_degraded".to_string(), Value::Bool(true));
    CapabilityOutput {
        text: format!("{text}{}", prompts::LOW_CONFIDENCE_NOTE),
        context,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::MockGenerationClient;
    use crate::retrieval::MockRetriever;

    fn passage(content: &str) -> RetrievedPassage {
        RetrievedPassage { content: content.to_string(), metadata: BTreeMap::new() }
    }

    #[tokio::test]
    async fn lookup_calls_complete_once_with_the_word() {
        let retriever = MockRetriever::new();
        let mut generation = MockGenerationClient::new();
        generation
            .expect_complete()
            .times(1)
            .withf(|prompt: &str| prompt.contains("innovation"))
            .returning(|_| Ok("單字：innovation ...".to_string()));

        let output = LookupHandler
            .invoke("innovation", &retriever, &generation)
            .await
            .unwrap();
        assert!(output.text.contains("innovation"));
        assert!(output.context.is_empty());
    }

    #[tokio::test]
    async fn topic_list_feeds_passages_into_the_prompt() {
        let mut retriever = MockRetriever::new();
        retriever
            .expect_fetch()
            .withf(|topic: &str, k: &usize| topic == "商業" && *k == 1)
            .times(1)
            .returning(|_, _| Ok(vec![passage("商業單字：market, revenue")]));

        let mut generation = MockGenerationClient::new();
        generation
            .expect_complete()
            .times(1)
            .withf(|prompt: &str| prompt.contains("商業單字：market, revenue"))
            .returning(|_| Ok("1. market ...".to_string()));

        let output = TopicListHandler { search_k: 1 }
            .invoke("商業", &retriever, &generation)
            .await
            .unwrap();
        assert!(output.text.contains("market"));
        assert_eq!(
            output.context["last_topic"],
            Value::String("商業".to_string())
        );
        assert!(output.context.contains_key("last_passages"));
    }

    #[tokio::test]
    async fn topic_list_degrades_on_empty_retrieval() {
        let mut retriever = MockRetriever::new();
        retriever.expect_fetch().returning(|_, _| Ok(Vec::new()));

        let mut generation = MockGenerationClient::new();
        generation
            .expect_complete()
            .times(1)
            .withf(|prompt: &str| prompt.contains("一般知識"))
            .returning(|_| Ok("1. market ...".to_string()));

        let output = TopicListHandler { search_k: 1 }
            .invoke("商業", &retriever, &generation)
            .await
            .unwrap();
        assert!(!output.text.is_empty());
        assert!(output.text.contains(prompts::LOW_CONFIDENCE_NOTE.trim()));
        assert_eq!(output.context["retrieval_degraded"], Value::Bool(true));
    }

    #[tokio::test]
    async fn quiz_degrades_when_retrieval_is_unavailable() {
        use crate::error::RetrievalError;

        let mut retriever = MockRetriever::new();
        retriever
            .expect_fetch()
            .returning(|_, _| Err(RetrievalError::Unavailable("connection refused".to_string())));

        let mut generation = MockGenerationClient::new();
        generation
            .expect_complete()
            .times(1)
            .returning(|_| Ok("【選擇題】...".to_string()));

        let output = QuizHandler { search_k: 1 }
            .invoke("科技", &retriever, &generation)
            .await
            .unwrap();
        assert!(!output.text.is_empty());
        assert_eq!(output.context["retrieval_degraded"], Value::Bool(true));
    }

    #[test]
    fn builtin_registry_has_the_three_capabilities() {
        let registry = builtin_registry(1).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry.resolve(LOOKUP).is_ok());
        assert!(registry.resolve(TOPIC_LIST).is_ok());
        assert!(registry.resolve(QUIZ).is_ok());
    }
}
