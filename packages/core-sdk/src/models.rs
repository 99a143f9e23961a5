use std::fmt;

use serde::{Deserialize, Serialize};

/**
 * \brief Relationship persona whose tone the model adopts.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Persona {
    Brother,
    Sister,
    Husband,
    Wife,
    Girlfriend,
    Boyfriend,
}

impl Persona {
    pub const ALL: [Persona; 6] = [
        Persona::Brother,
        Persona::Sister,
        Persona::Husband,
        Persona::Wife,
        Persona::Girlfriend,
        Persona::Boyfriend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Persona::Brother => "Brother",
            Persona::Sister => "Sister",
            Persona::Husband => "Husband",
            Persona::Wife => "Wife",
            Persona::Girlfriend => "Girlfriend",
            Persona::Boyfriend => "Boyfriend",
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Persona {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Persona::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown role: {}", s))
    }
}

/**
 * \brief How the user wants to be addressed.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameKind {
    First,
    Full,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNamePreference {
    #[serde(rename = "type")]
    pub kind: NameKind,
    #[serde(default)]
    pub name: Option<String>,
}

impl UserNamePreference {
    /**
     * \brief The supplied name, if it carries anything besides whitespace.
     */
    pub fn preferred_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.trim().is_empty())
    }
}

/**
 * \brief Body of `POST /chat` and `POST /chat/stream`.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /** \brief User text, forwarded unmodified. Must be non-empty. */
    pub message: String,
    pub role: Persona,
    #[serde(rename = "userNamePreference", default)]
    pub user_name_preference: Option<UserNamePreference>,
}

impl ChatRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.message.is_empty() {
            return Err("message must not be empty".to_string());
        }
        Ok(())
    }

    pub fn preferred_name(&self) -> Option<&str> {
        self.user_name_preference
            .as_ref()
            .and_then(UserNamePreference::preferred_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

/**
 * \brief Speaker of a conversation message, serialized as the OpenAI `role`.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    System,
    User,
}

/**
 * \brief Message aligned with the OpenAI chat message format.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Speaker,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Speaker::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Speaker::User,
            content: content.into(),
        }
    }
}
