/// Unique code of a SYNDICATION or WEB item: hex MD5 of its URL.
pub fn url_fingerprint(url: &str) -> String {
    format!("{:x}", md5::compute(url.trim().as_bytes()))
}

/// Unique code of a channel post: the album ID when the message belongs to
/// one, the message ID otherwise.
pub fn channel_fingerprint(channel_id: i64, media_group_id: Option<i64>, message_id: i64) -> String {
    format!("tg_{}_{}", channel_id, media_group_id.unwrap_or(message_id))
}
