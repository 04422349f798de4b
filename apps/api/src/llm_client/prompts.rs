// Prompt constants for loop campaign message generation.

/// System prompt for per-contact loop messages: plain text, short, no preamble.
pub const LOOP_MESSAGE_SYSTEM: &str = "You write short, friendly Messenger messages \
    on behalf of a small business to one of its customers. \
    Respond with the message text only. \
    Do NOT wrap it in quotes. \
    Do NOT include explanations, options, or sign-offs with placeholder names. \
    Keep it under 300 characters.";

/// Loop message prompt template. Replace `{first_name}` and `{campaign_prompt}`.
pub const LOOP_MESSAGE_TEMPLATE: &str = "Write today's message for a customer named {first_name}.

Address them by first name. Follow these campaign instructions:
{campaign_prompt}";

/// Greeting used whenever generation fails or times out.
pub fn fallback_message(first_name: &str) -> String {
    format!("Hi {first_name}! Hope you're having a great day. Let us know if there's anything we can help you with.")
}

pub fn build_loop_message_prompt(campaign_prompt: &str, first_name: &str) -> String {
    LOOP_MESSAGE_TEMPLATE
        .replace("{first_name}", first_name)
        .replace("{campaign_prompt}", campaign_prompt.trim())
}
