//! Prompt construction for the four triage calls.
//!
//! Prompts are written in Portuguese: the support desk answers customers
//! in Portuguese and the auto-reply is sent verbatim.

use crate::triage::types::{MAX_KEYWORDS, TriageRequest};

/// Characters of the subject sent to the model.
const SUBJECT_PREVIEW_CHARS: usize = 200;

/// Characters of the body sent to the model.
const BODY_PREVIEW_CHARS: usize = 4000;

/// Name used in replies when the sender did not give one.
pub const DEFAULT_SENDER_NAME: &str = "Cliente";

/// Default category list offered to the classifier.
pub fn default_categories() -> Vec<String> {
    [
        "Geral",
        "Suporte Técnico",
        "Financeiro",
        "Comercial",
        "Cancelamento",
        "Reclamação",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Truncate on a char boundary.
fn preview(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect()
}

/// The message block shared by every prompt.
pub fn message_block(request: &TriageRequest) -> String {
    format!(
        "Assunto: {}\n\nMensagem:\n{}",
        preview(&request.subject, SUBJECT_PREVIEW_CHARS),
        preview(&request.body, BODY_PREVIEW_CHARS),
    )
}

pub fn categorize_system_prompt(categories: &[String]) -> String {
    format!(
        "Você classifica mensagens de suporte ao cliente.\n\
         Categorias conhecidas: {}.\n\
         Responda APENAS com o nome da categoria, sem explicações e sem pontuação.",
        categories.join(", ")
    )
}

pub fn keywords_system_prompt() -> String {
    format!(
        "Você extrai palavras-chave de mensagens de suporte ao cliente.\n\
         Responda APENAS com no máximo {MAX_KEYWORDS} palavras-chave separadas por vírgula, \
         em letras minúsculas, sem numeração."
    )
}

pub fn complexity_system_prompt() -> String {
    "Você avalia a complexidade de mensagens de suporte ao cliente em uma escala de 1 a 5:\n\
     1 = dúvida simples, resposta imediata\n\
     2 = orientação padrão\n\
     3 = exige consulta a informações do cliente\n\
     4 = problema técnico ou financeiro que exige análise humana\n\
     5 = reclamação grave, risco jurídico ou cancelamento\n\
     Responda APENAS com o número."
        .to_string()
}

pub fn reply_system_prompt() -> String {
    "Você é um atendente de suporte cordial e objetivo.\n\
     Escreva a resposta ao cliente em português, em até 3 parágrafos curtos.\n\
     Cumprimente o cliente pelo nome, não invente prazos, valores ou políticas \
     e não prometa ações que dependam de outra equipe.\n\
     Responda APENAS com o texto da resposta, sem assunto e sem assinatura."
        .to_string()
}

pub fn reply_user_prompt(request: &TriageRequest, category: &str) -> String {
    format!(
        "Nome do cliente: {}\nCategoria: {}\n\n{}",
        sender_name(request),
        category,
        message_block(request)
    )
}

/// Sender display name, defaulting to a neutral greeting target.
pub fn sender_name(request: &TriageRequest) -> &str {
    request
        .sender_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_SENDER_NAME)
}

/// Reply used when generation fails.
pub fn fallback_reply(request: &TriageRequest) -> String {
    format!(
        "Olá {}, recebemos sua mensagem e nossa equipe de suporte já está analisando. \
         Retornaremos em breve com mais informações.",
        sender_name(request)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_prompt_lists_categories() {
        let prompt = categorize_system_prompt(&default_categories());
        assert!(prompt.contains("Financeiro"));
        assert!(prompt.contains("Cancelamento"));
    }

    #[test]
    fn keywords_prompt_states_limit() {
        assert!(keywords_system_prompt().contains("5"));
    }

    #[test]
    fn message_block_truncates_body() {
        let request = TriageRequest::new("Assunto", "x".repeat(10_000));
        let block = message_block(&request);
        assert!(block.chars().count() < BODY_PREVIEW_CHARS + 100);
    }

    #[test]
    fn message_block_truncation_is_utf8_safe() {
        let request = TriageRequest::new("ç".repeat(500), "ã".repeat(5_000));
        let block = message_block(&request);
        assert!(block.starts_with("Assunto: ç"));
    }

    #[test]
    fn fallback_reply_uses_sender_name() {
        let request = TriageRequest::new("Oi", "Ajuda").with_sender_name("Marina");
        assert!(fallback_reply(&request).starts_with("Olá Marina,"));
    }

    #[test]
    fn fallback_reply_without_name_uses_default() {
        let request = TriageRequest::new("Oi", "Ajuda");
        assert!(fallback_reply(&request).starts_with("Olá Cliente,"));

        let blank = TriageRequest::new("Oi", "Ajuda").with_sender_name("   ");
        assert!(fallback_reply(&blank).starts_with("Olá Cliente,"));
    }

    #[test]
    fn reply_prompt_includes_name_and_category() {
        let request = TriageRequest::new("Senha", "Esqueci minha senha").with_sender_name("João");
        let prompt = reply_user_prompt(&request, "Suporte Técnico");
        assert!(prompt.contains("João"));
        assert!(prompt.contains("Suporte Técnico"));
        assert!(prompt.contains("Esqueci minha senha"));
    }
}
