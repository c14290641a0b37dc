//! Key layout.
//!
//! The prefixes are a contract: `burn_push` scans `push:*:<participant>` and
//! the per-chat wipe scans `push:<chat>:*`, so the push family must keep the
//! `push:<chat>:<participant>` shape.

pub fn pubkey(device: &str) -> String {
    format!("pubkey:{device}")
}

pub fn subscription(device: &str) -> String {
    format!("sub:{device}")
}

pub fn chat(chat_uuid: &str) -> String {
    format!("chat:{chat_uuid}")
}

pub fn invite(token: &str) -> String {
    format!("invite:{token}")
}

pub fn message(chat_uuid: &str, message_id: &str) -> String {
    format!("msg:{chat_uuid}:{message_id}")
}

pub fn message_queue(chat_uuid: &str) -> String {
    format!("msg_queue:{chat_uuid}")
}

pub fn key_bundle(device: &str) -> String {
    format!("keybundle:{device}")
}

pub fn prekeys(device: &str) -> String {
    format!("prekeys:{device}")
}

pub fn push(chat_uuid: &str, participant_id: &str) -> String {
    format!("push:{chat_uuid}:{participant_id}")
}

pub fn push_chat_pattern(chat_uuid: &str) -> String {
    format!("push:{chat_uuid}:*")
}

pub fn push_participant_pattern(participant_id: &str) -> String {
    format!("push:*:{participant_id}")
}

pub fn rate(device: &str) -> String {
    format!("rate:{device}")
}

pub fn message_hash(device: &str, hash: &str) -> String {
    format!("msghash:{device}:{hash}")
}

pub fn message_hash_pattern(device: &str) -> String {
    format!("msghash:{device}:*")
}

pub fn message_timing(device: &str) -> String {
    format!("msgtiming:{device}")
}

pub fn bot_count(device: &str) -> String {
    format!("botcount:{device}")
}

pub fn warning(device: &str) -> String {
    format!("warn:{device}")
}

pub fn ban(device: &str) -> String {
    format!("ban:{device}")
}
