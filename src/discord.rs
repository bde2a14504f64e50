//! Discord REST adapters for the message and thread sources.

use crate::error::{Error, Result};
use crate::history::{MessageSource, SourceAttachment, SourceMessage};
use crate::thread::ThreadSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::builder::GetMessages;
use serenity::http::Http;
use serenity::model::channel::{Channel, ChannelType, Message};
use serenity::model::id::{ChannelId, GuildId, MessageId};
use std::sync::Arc;
use tracing::{debug, warn};

fn source_error(e: serenity::Error) -> Error {
    Error::Source(e.to_string())
}

/// Projects a serenity message, keeping the timestamp to the millisecond.
pub fn to_source_message(msg: &Message) -> Result<SourceMessage> {
    let created_at = DateTime::parse_from_rfc3339(&msg.timestamp.to_string())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Source(format!("bad timestamp on message {}: {}", msg.id, e)))?;

    Ok(SourceMessage {
        id: msg.id.get(),
        channel_id: msg.channel_id.get(),
        author_id: msg.author.id.get(),
        author_name: msg.author.name.clone(),
        author_is_bot: msg.author.bot,
        content: Some(msg.content.clone()),
        created_at,
        attachments: msg
            .attachments
            .iter()
            .map(|a| SourceAttachment {
                url: a.url.clone(),
                content_type: a.content_type.clone(),
            })
            .collect(),
    })
}

/// A guild text channel read through the REST API.
pub struct ChannelSource {
    http: Arc<Http>,
    channel_id: ChannelId,
    name: String,
}

impl ChannelSource {
    pub fn new(http: Arc<Http>, channel_id: ChannelId, name: String) -> Self {
        Self {
            http,
            channel_id,
            name,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_before(&self, before: Option<u64>, limit: u8) -> Result<Vec<SourceMessage>> {
        let mut builder = GetMessages::new().limit(limit);
        if let Some(id) = before {
            builder = builder.before(MessageId::new(id));
        }

        let messages = self
            .channel_id
            .messages(&self.http, builder)
            .await
            .map_err(source_error)?;
        messages.iter().map(to_source_message).collect()
    }
}

/// Text channels of a guild in sidebar order.
pub async fn text_channels(http: &Arc<Http>, guild_id: u64) -> Result<Vec<ChannelSource>> {
    let channels = GuildId::new(guild_id)
        .channels(http)
        .await
        .map_err(source_error)?;

    let mut text: Vec<_> = channels
        .into_values()
        .filter(|c| c.kind == ChannelType::Text)
        .collect();
    text.sort_by_key(|c| (c.position, c.id));
    debug!("Guild {} has {} text channels", guild_id, text.len());

    Ok(text
        .into_iter()
        .map(|c| ChannelSource::new(http.clone(), c.id, c.name))
        .collect())
}

/// A thread started from a message in `parent_id`. The starter message shares
/// the thread's id.
pub struct DiscordThread {
    http: Arc<Http>,
    thread_id: ChannelId,
    parent_id: ChannelId,
}

impl DiscordThread {
    pub fn new(http: Arc<Http>, thread_id: ChannelId, parent_id: ChannelId) -> Self {
        Self {
            http,
            thread_id,
            parent_id,
        }
    }

    /// Looks the thread up to find its parent channel.
    pub async fn resolve(http: Arc<Http>, thread_id: u64) -> Result<Self> {
        let thread_id = ChannelId::new(thread_id);
        let channel = thread_id.to_channel(&http).await.map_err(source_error)?;
        let parent_id = match channel {
            Channel::Guild(gc) => gc.parent_id,
            _ => None,
        }
        .ok_or_else(|| Error::Source(format!("channel {} is not a thread", thread_id)))?;

        Ok(Self::new(http, thread_id, parent_id))
    }
}

#[async_trait]
impl ThreadSource for DiscordThread {
    async fn recent_messages(&self, limit: u8) -> Result<Vec<SourceMessage>> {
        let messages = self
            .thread_id
            .messages(&self.http, GetMessages::new().limit(limit))
            .await
            .map_err(source_error)?;
        messages.iter().map(to_source_message).collect()
    }

    async fn starter_message(&self) -> Result<Option<SourceMessage>> {
        match self
            .parent_id
            .message(&self.http, MessageId::new(self.thread_id.get()))
            .await
        {
            Ok(msg) => to_source_message(&msg).map(Some),
            Err(e) => {
                warn!(
                    "Starter message for thread {} unavailable: {}",
                    self.thread_id, e
                );
                Ok(None)
            }
        }
    }
}
