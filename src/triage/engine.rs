//! Triage engine: the four-call fan-out with static fallbacks.
//!
//! Flow:
//! 1. categorize, extract keywords and score complexity run concurrently
//! 2. escalation policy: complexity >= 4 flags the message for a human
//! 3. reply generation runs only for messages that are not escalated
//!
//! Every call has a fallback, so triage itself never fails.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::LlmError;
use crate::llm::costs;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::triage::parse::{parse_category, parse_complexity, parse_keywords, parse_reply};
use crate::triage::prompts;
use crate::triage::types::{
    Complexity, FALLBACK_CATEGORY, TriageCall, TriageOutcome, TriageRequest, TriageUsage,
};

/// Classification calls are short and near-deterministic.
const CLASSIFY_TEMPERATURE: f32 = 0.0;
const CATEGORY_MAX_TOKENS: u32 = 20;
const KEYWORDS_MAX_TOKENS: u32 = 60;
const COMPLEXITY_MAX_TOKENS: u32 = 5;

/// Reply generation gets more room and a little variety.
const REPLY_TEMPERATURE: f32 = 0.4;
const REPLY_MAX_TOKENS: u32 = 500;

/// Triage engine configuration.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Categories offered to the classifier.
    pub categories: Vec<String>,
    /// Upper bound on any single LLM call.
    pub call_timeout: Duration,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            categories: prompts::default_categories(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs the triage calls against an LLM provider.
pub struct TriageEngine {
    llm: Arc<dyn LlmProvider>,
    config: TriageConfig,
}

impl TriageEngine {
    pub fn new(llm: Arc<dyn LlmProvider>, config: TriageConfig) -> Self {
        Self { llm, config }
    }

    /// Triage a message, discarding usage accounting.
    pub async fn triage(&self, request: &TriageRequest) -> TriageOutcome {
        self.triage_with_usage(request).await.0
    }

    /// Model behind every call.
    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Triage a message and report token usage across all calls made.
    ///
    /// The outcome depends on the message alone: `needs_human` is set
    /// exactly when complexity reaches the threshold, and only then is the
    /// reply missing.
    pub async fn triage_with_usage(&self, request: &TriageRequest) -> (TriageOutcome, TriageUsage) {
        let mut usage = TriageUsage::default();

        let (category, keywords, complexity) = futures::join!(
            self.classify(
                prompts::categorize_system_prompt(&self.config.categories),
                CATEGORY_MAX_TOKENS,
                request,
            ),
            self.classify(prompts::keywords_system_prompt(), KEYWORDS_MAX_TOKENS, request),
            self.classify(
                prompts::complexity_system_prompt(),
                COMPLEXITY_MAX_TOKENS,
                request,
            ),
        );

        let category = self
            .settle(TriageCall::Categorize, category, &mut usage)
            .and_then(|raw| parse_category(&raw))
            .unwrap_or_else(|| FALLBACK_CATEGORY.to_string());

        let keywords = self
            .settle(TriageCall::Keywords, keywords, &mut usage)
            .map(|raw| parse_keywords(&raw))
            .unwrap_or_default();

        let complexity = match self.settle(TriageCall::Complexity, complexity, &mut usage) {
            Some(raw) => parse_complexity(&raw).unwrap_or_else(|| {
                warn!(raw = %raw, "Unparseable complexity score, using fallback");
                Complexity::FALLBACK
            }),
            None => Complexity::FALLBACK,
        };

        if complexity.requires_human() {
            info!(
                category = %category,
                complexity = complexity.value(),
                "Message escalated, skipping reply generation"
            );
            return (
                TriageOutcome::escalated(category, complexity, keywords),
                usage,
            );
        }

        let reply = self.generate_reply(request, &category).await;
        let reply = self
            .settle(TriageCall::Reply, reply, &mut usage)
            .and_then(|raw| parse_reply(&raw))
            .unwrap_or_else(|| prompts::fallback_reply(request));

        debug!(
            category = %category,
            complexity = complexity.value(),
            keywords = keywords.len(),
            calls = usage.calls,
            "Triage complete"
        );

        (
            TriageOutcome::answered(category, complexity, keywords, reply),
            usage,
        )
    }

    /// Run one classification call over the message block.
    async fn classify(
        &self,
        system: String,
        max_tokens: u32,
        request: &TriageRequest,
    ) -> Result<(String, u32, u32), LlmError> {
        self.complete(
            system,
            prompts::message_block(request),
            CLASSIFY_TEMPERATURE,
            max_tokens,
        )
        .await
    }

    async fn generate_reply(
        &self,
        request: &TriageRequest,
        category: &str,
    ) -> Result<(String, u32, u32), LlmError> {
        self.complete(
            prompts::reply_system_prompt(),
            prompts::reply_user_prompt(request, category),
            REPLY_TEMPERATURE,
            REPLY_MAX_TOKENS,
        )
        .await
    }

    async fn complete(
        &self,
        system: String,
        user: String,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<(String, u32, u32), LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(system),
            ChatMessage::user(user),
        ])
        .with_temperature(temperature)
        .with_max_tokens(max_tokens);

        let response = tokio::time::timeout(self.config.call_timeout, self.llm.complete(request))
            .await
            .map_err(|_| LlmError::Timeout(self.config.call_timeout))??;

        Ok((
            response.content,
            response.input_tokens,
            response.output_tokens,
        ))
    }

    /// Record usage for a finished call and return its text on success.
    fn settle(
        &self,
        kind: TriageCall,
        result: Result<(String, u32, u32), LlmError>,
        usage: &mut TriageUsage,
    ) -> Option<String> {
        match result {
            Ok((content, input_tokens, output_tokens)) => {
                let cost = costs::call_cost(self.llm.cost_per_token(), input_tokens, output_tokens);
                usage.record(input_tokens, output_tokens, cost);
                Some(content)
            }
            Err(e) => {
                usage.record_failure();
                warn!(call = kind.label(), error = %e, "Triage call failed, using fallback");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use crate::llm::provider::{CompletionResponse, FinishReason, Role};

    /// Mock LLM that answers by inspecting the system prompt.
    struct ScriptedLlm {
        category: Result<String, ()>,
        keywords: Result<String, ()>,
        complexity: Result<String, ()>,
        reply: Result<String, ()>,
        reply_calls: AtomicUsize,
        reply_prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn answering(category: &str, keywords: &str, complexity: &str, reply: &str) -> Self {
            Self {
                category: Ok(category.into()),
                keywords: Ok(keywords.into()),
                complexity: Ok(complexity.into()),
                reply: Ok(reply.into()),
                reply_calls: AtomicUsize::new(0),
                reply_prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                category: Err(()),
                keywords: Err(()),
                complexity: Err(()),
                reply: Err(()),
                reply_calls: AtomicUsize::new(0),
                reply_prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "mock-triage"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let system = request
                .messages
                .iter()
                .find(|m| m.role == Role::System)
                .map(|m| m.content.clone())
                .unwrap_or_default();

            let answer = if system.contains("classifica") {
                &self.category
            } else if system.contains("palavras-chave") {
                &self.keywords
            } else if system.contains("complexidade") {
                &self.complexity
            } else {
                self.reply_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(user) = request.messages.iter().find(|m| m.role == Role::User) {
                    self.reply_prompts.lock().unwrap().push(user.content.clone());
                }
                &self.reply
            };

            match answer {
                Ok(text) => Ok(CompletionResponse {
                    content: text.clone(),
                    input_tokens: 100,
                    output_tokens: 10,
                    finish_reason: FinishReason::Stop,
                }),
                Err(()) => Err(LlmError::RequestFailed {
                    provider: "mock".into(),
                    reason: "scripted failure".into(),
                }),
            }
        }
    }

    fn engine(llm: Arc<ScriptedLlm>) -> TriageEngine {
        TriageEngine::new(llm, TriageConfig::default())
    }

    #[tokio::test]
    async fn simple_message_gets_reply() {
        let llm = Arc::new(ScriptedLlm::answering(
            "Financeiro",
            "fatura, segunda via",
            "2",
            "Olá Ana, segue a segunda via da sua fatura.",
        ));
        let request =
            TriageRequest::new("Segunda via", "Preciso da segunda via do boleto").with_sender_name("Ana");

        let (outcome, usage) = engine(llm.clone()).triage_with_usage(&request).await;

        assert_eq!(outcome.category, "Financeiro");
        assert_eq!(outcome.keywords, vec!["fatura", "segunda via"]);
        assert_eq!(outcome.complexity.value(), 2);
        assert!(!outcome.needs_human);
        assert_eq!(
            outcome.response.as_deref(),
            Some("Olá Ana, segue a segunda via da sua fatura.")
        );
        assert_eq!(usage.calls, 4);
        assert_eq!(usage.failed_calls, 0);
        assert_eq!(llm.reply_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn complexity_four_escalates_without_generation() {
        let llm = Arc::new(ScriptedLlm::answering(
            "Reclamação",
            "cobrança indevida",
            "4",
            "should never be used",
        ));
        let request = TriageRequest::new("Cobrança indevida", "Vou acionar o Procon");

        let (outcome, usage) = engine(llm.clone()).triage_with_usage(&request).await;

        assert!(outcome.needs_human);
        assert!(outcome.response.is_none());
        assert_eq!(outcome.complexity.value(), 4);
        assert_eq!(usage.calls, 3);
        assert_eq!(llm.reply_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn complexity_five_escalates() {
        let llm = Arc::new(ScriptedLlm::answering("Cancelamento", "", "5", "x"));
        let outcome = engine(llm).triage(&TriageRequest::new("Cancelar", "Quero cancelar")).await;
        assert!(outcome.needs_human);
        assert!(outcome.response.is_none());
    }

    #[tokio::test]
    async fn all_calls_failing_uses_every_fallback() {
        let llm = Arc::new(ScriptedLlm::failing());
        let request = TriageRequest::new("Ajuda", "Não consigo acessar").with_sender_name("Carlos");

        let (outcome, usage) = engine(llm).triage_with_usage(&request).await;

        assert_eq!(outcome.category, "Geral");
        assert!(outcome.keywords.is_empty());
        assert_eq!(outcome.complexity, Complexity::FALLBACK);
        // Fallback complexity 3 is below the threshold, so a templated reply is used.
        assert!(!outcome.needs_human);
        let reply = outcome.response.unwrap();
        assert!(reply.starts_with("Olá Carlos,"));
        assert_eq!(usage.failed_calls, 4);
    }

    #[tokio::test]
    async fn unparseable_complexity_falls_back_to_three() {
        let llm = Arc::new(ScriptedLlm::answering("Geral", "oi", "muito alta", "Olá!"));
        let outcome = engine(llm).triage(&TriageRequest::new("Oi", "Olá")).await;
        assert_eq!(outcome.complexity.value(), 3);
        assert!(!outcome.needs_human);
    }

    #[tokio::test]
    async fn out_of_range_complexity_falls_back_to_three() {
        let llm = Arc::new(ScriptedLlm::answering("Geral", "oi", "9", "Olá!"));
        let outcome = engine(llm).triage(&TriageRequest::new("Oi", "Olá")).await;
        assert_eq!(outcome.complexity.value(), 3);
    }

    #[tokio::test]
    async fn empty_category_answer_falls_back_to_geral() {
        let llm = Arc::new(ScriptedLlm::answering("  ", "a", "1", "Olá!"));
        let outcome = engine(llm).triage(&TriageRequest::new("Oi", "Olá")).await;
        assert_eq!(outcome.category, "Geral");
    }

    #[tokio::test]
    async fn empty_reply_answer_uses_template() {
        let llm = Arc::new(ScriptedLlm::answering("Geral", "a", "1", "   "));
        let outcome = engine(llm).triage(&TriageRequest::new("Oi", "Olá")).await;
        assert!(outcome.response.unwrap().starts_with("Olá Cliente,"));
    }

    #[tokio::test]
    async fn keywords_are_capped() {
        let llm = Arc::new(ScriptedLlm::answering("Geral", "a, b, c, d, e, f, g, h", "1", "ok"));
        let outcome = engine(llm).triage(&TriageRequest::new("Oi", "Olá")).await;
        assert_eq!(outcome.keywords.len(), 5);
    }

    #[tokio::test]
    async fn reply_prompt_carries_resolved_category() {
        let llm = Arc::new(ScriptedLlm::answering("Suporte Técnico", "senha", "1", "ok"));
        engine(llm.clone())
            .triage(&TriageRequest::new("Senha", "Esqueci a senha"))
            .await;
        let prompts = llm.reply_prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Categoria: Suporte Técnico"));
    }

    #[tokio::test]
    async fn needs_human_tracks_complexity_alone() {
        for score in 1..=5u8 {
            let llm = Arc::new(ScriptedLlm::answering(
                "Financeiro",
                "estorno",
                &score.to_string(),
                "Olá!",
            ));
            let outcome = engine(llm)
                .triage(&TriageRequest::new("Estorno", "Chargeback aberto"))
                .await;
            assert_eq!(outcome.complexity.value(), score);
            assert_eq!(outcome.needs_human, score >= 4, "score {score}");
            assert_eq!(outcome.needs_human, outcome.response.is_none(), "score {score}");
        }
    }

    #[tokio::test]
    async fn each_classification_gets_its_own_prompt() {
        let llm = Arc::new(ScriptedLlm::answering("Financeiro", "estorno", "2", "Olá!"));
        let (outcome, usage) = engine(llm.clone())
            .triage_with_usage(&TriageRequest::new("Estorno", "Chargeback aberto"))
            .await;
        assert_eq!(outcome.category, "Financeiro");
        assert_eq!(outcome.keywords, vec!["estorno"]);
        assert_eq!(outcome.complexity.value(), 2);
        assert_eq!(usage.calls, 4);
        assert_eq!(llm.reply_calls.load(Ordering::SeqCst), 1);
    }

    /// Provider that never answers; exercises the per-call timeout.
    struct HangingLlm;

    #[async_trait]
    impl LlmProvider for HangingLlm {
        fn model_name(&self) -> &str {
            "hanging"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn hanging_provider_times_out_into_fallbacks() {
        let engine = TriageEngine::new(
            Arc::new(HangingLlm),
            TriageConfig {
                call_timeout: Duration::from_millis(20),
                ..TriageConfig::default()
            },
        );
        let (outcome, usage) = engine
            .triage_with_usage(&TriageRequest::new("Oi", "Olá"))
            .await;
        assert_eq!(outcome.category, "Geral");
        assert_eq!(outcome.complexity, Complexity::FALLBACK);
        assert_eq!(usage.failed_calls, 4);
    }
}
