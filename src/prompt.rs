use serde::Serialize;

/// Persona and style instructions sent ahead of every question.
pub const PERSONA: &str = "\
You are a highly capable, professional and friendly assistant. Give direct, \
helpful and authoritative answers.

TONE AND STYLE:
- Speak naturally and confidently, in a professional yet conversational tone.
- Use formatting such as bullet points and bold text to keep answers easy to read.
- A subtle emoji is fine when it fits (for example 👍, ✅, 🚀).

KNOWLEDGE SOURCE:
- You have specialised company technical data (given below) as well as your own general knowledge.
- Blend the two seamlessly. Prefer the technical data whenever it covers the question.
- When a question is general, or about the company but not covered below, answer confidently from general knowledge.

STRICT TABOOS:
- Never say that you lack information to confirm something, or that the material does not mention it.
- Never mention context, snippets, files or provided data.
- Present everything as your own inherent knowledge.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One chat message, serialised in the OpenAI chat-completions shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Second system message, carrying the retrieved context.
pub fn knowledge_block(context: &str) -> String {
    format!("Specialized Knowledge Base: {context}")
}

/// Assemble persona, knowledge block and question, in that order.
pub fn build_messages(question: &str, context: &str) -> Vec<Message> {
    vec![
        Message::system(PERSONA),
        Message::system(knowledge_block(context)),
        Message::user(question),
    ]
}
