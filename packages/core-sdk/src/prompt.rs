use crate::models::{Message, Persona};

/** \brief Upper bound on the sanitized preferred name, in characters. */
pub const MAX_NAME_CHARS: usize = 80;

/**
 * \brief Build the two-message conversation sent upstream: persona instruction, then user text.
 * \param user_text       Raw user text, passed through untouched
 * \param role            Persona whose tone the model adopts
 * \param preferred_name  Optional name to address the user by
 */
pub fn build_messages(user_text: &str, role: Persona, preferred_name: Option<&str>) -> [Message; 2] {
    let mut system = format!("Adopt the tone and style of a {}. ", role);
    if let Some(name) = preferred_name.and_then(sanitize_name) {
        system.push_str(&format!("Address the user as {}. ", name));
    }
    system.push_str("Respond naturally and directly without disclaimers.");

    [Message::system(system), Message::user(user_text)]
}

/**
 * \brief Collapse whitespace runs and cap the length. Returns `None` for blank input.
 */
pub fn sanitize_name(name: &str) -> Option<String> {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(MAX_NAME_CHARS).collect())
}
