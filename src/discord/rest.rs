//! Discord REST client. Every call goes through the bounded backoff
//! schedule; 404s on resolution endpoints are `Ok(None)` rather than errors
//! so callers can skip missing guilds and members without special-casing.

use anyhow::{anyhow, Context, Result};
use reqwest::{header::AUTHORIZATION, Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use super::{DiscordApi, Guild, Member, Role};
use crate::{constants::DISCORD_API_BASE, retrier::with_backoff, settings};

#[derive(Clone)]
pub struct DiscordRestClient {
	client: reqwest::Client,
	base: Url,
	bot_token: String,
	application_id: String,
}

impl DiscordRestClient {
	pub fn new(client: reqwest::Client, discord: &settings::Discord) -> Result<Self> {
		Ok(Self {
			client,
			base: Url::parse(DISCORD_API_BASE).context("Discord API base URL")?,
			bot_token: discord.bot_token.clone(),
			application_id: discord.application_id.clone(),
		})
	}

	fn endpoint(&self, path: &str) -> Result<Url> {
		self.base.join(path).with_context(|| format!("building Discord endpoint {path}"))
	}

	async fn get_optional<T: DeserializeOwned>(&self, path: String) -> Result<Option<T>> {
		with_backoff("discord GET", || async {
			let response = self
				.client
				.get(self.endpoint(&path)?)
				.header(AUTHORIZATION, format!("Bot {}", self.bot_token))
				.send()
				.await?;

			if response.status() == StatusCode::NOT_FOUND {
				return Ok(None);
			}
			let response = response.error_for_status()?;
			Ok(Some(response.json::<T>().await?))
		})
		.await
	}

	async fn send_no_content(&self, method: Method, path: String) -> Result<()> {
		with_backoff("discord role mutation", || async {
			let response = self
				.client
				.request(method.clone(), self.endpoint(&path)?)
				.header(AUTHORIZATION, format!("Bot {}", self.bot_token))
				.header("X-Audit-Log-Reason", "wallet holdings gating")
				.send()
				.await?;

			match response.status() {
				status if status.is_success() => Ok(()),
				status => Err(anyhow!("Discord returned {status} for {path}")),
			}
		})
		.await
	}
}

#[async_trait::async_trait]
impl DiscordApi for DiscordRestClient {
	async fn guild(&self, guild_id: &str) -> Result<Option<Guild>> {
		self.get_optional(format!("guilds/{guild_id}")).await
	}

	async fn member(&self, guild_id: &str, user_id: &str) -> Result<Option<Member>> {
		self.get_optional(format!("guilds/{guild_id}/members/{user_id}")).await
	}

	async fn roles(&self, guild_id: &str) -> Result<Vec<Role>> {
		Ok(self
			.get_optional::<Vec<Role>>(format!("guilds/{guild_id}/roles"))
			.await?
			.unwrap_or_default())
	}

	async fn bot_member(&self, guild_id: &str) -> Result<Option<Member>> {
		self.member(guild_id, &self.application_id).await
	}

	async fn add_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<()> {
		self.send_no_content(
			Method::PUT,
			format!("guilds/{guild_id}/members/{user_id}/roles/{role_id}"),
		)
		.await
	}

	async fn remove_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<()> {
		self.send_no_content(
			Method::DELETE,
			format!("guilds/{guild_id}/members/{user_id}/roles/{role_id}"),
		)
		.await
	}
}
