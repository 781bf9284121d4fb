// src/emotes/mod.rs - Third-party emote catalogs and token substitution

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::{ChatConfig, Endpoints};
use crate::platforms::http_client;
use crate::types::Fragment;

/// Used by `EmoteResolver::new`; `from_config` takes the configured value
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Emote providers, in resolution priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmoteProvider {
    SevenTv,
    Bttv,
    Ffz,
    TwitchNative,
}

impl EmoteProvider {
    /// First provider with a match wins
    pub const PRIORITY: [EmoteProvider; 4] = [
        EmoteProvider::SevenTv,
        EmoteProvider::Bttv,
        EmoteProvider::Ffz,
        EmoteProvider::TwitchNative,
    ];
}

/// Emote name to image URL, per provider
#[derive(Debug, Clone, Default)]
pub struct EmoteCatalog {
    catalogs: HashMap<EmoteProvider, HashMap<String, String>>,
}

impl EmoteCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later inserts for the same name replace earlier ones
    pub fn insert(&mut self, provider: EmoteProvider, name: impl Into<String>, url: impl Into<String>) {
        self.catalogs
            .entry(provider)
            .or_default()
            .insert(name.into(), url.into());
    }

    pub fn extend<I>(&mut self, provider: EmoteProvider, entries: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.catalogs.entry(provider).or_default().extend(entries);
    }

    pub fn resolve(&self, token: &str) -> Option<&str> {
        EmoteProvider::PRIORITY
            .iter()
            .filter_map(|provider| self.catalogs.get(provider))
            .find_map(|catalog| catalog.get(token))
            .map(String::as_str)
    }

    pub fn len(&self, provider: EmoteProvider) -> usize {
        self.catalogs.get(&provider).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.catalogs.values().all(HashMap::is_empty)
    }

    /// Split on single spaces and swap every known word for an emote
    pub fn substitute(&self, text: &str) -> Vec<Fragment> {
        text.split(' ')
            .map(|word| match self.resolve(word) {
                Some(url) => Fragment::Emote {
                    name: word.to_string(),
                    url: url.to_string(),
                },
                None => Fragment::Text(word.to_string()),
            })
            .collect()
    }
}

// Provider response shapes. Unknown fields are ignored and missing lists default to empty.

#[derive(Debug, Deserialize)]
struct SevenTvEmoteSet {
    #[serde(default)]
    emotes: Vec<SevenTvEmote>,
}

#[derive(Debug, Deserialize)]
struct SevenTvEmote {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct BttvEmote {
    id: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct BttvUser {
    #[serde(default, rename = "channelEmotes")]
    channel_emotes: Vec<BttvEmote>,
    #[serde(default, rename = "sharedEmotes")]
    shared_emotes: Vec<BttvEmote>,
}

#[derive(Debug, Deserialize)]
struct FfzGlobal {
    #[serde(default)]
    sets: HashMap<String, FfzSet>,
}

#[derive(Debug, Deserialize)]
struct FfzSet {
    #[serde(default)]
    emoticons: Vec<FfzEmote>,
}

#[derive(Debug, Deserialize)]
struct FfzEmote {
    id: u64,
    name: String,
}

fn seventv_url(id: &str) -> String {
    format!("https://cdn.7tv.app/emote/{}/1x.webp", id)
}

fn bttv_url(id: &str) -> String {
    format!("https://cdn.betterttv.net/emote/{}/1x", id)
}

fn ffz_url(id: u64) -> String {
    format!("https://cdn.frankerfacez.com/emote/{}/1", id)
}

/// Image URL for a Twitch emote id announced in an IRC `emotes` tag
pub fn twitch_native_url(id: &str) -> String {
    format!("https://static-cdn.jtvnw.net/emoticons/v2/{}/default/dark/1.0", id)
}

fn parse_seventv(body: &str) -> Result<Vec<(String, String)>> {
    let set: SevenTvEmoteSet = serde_json::from_str(body).context("Unexpected 7TV emote set shape")?;
    Ok(set
        .emotes
        .into_iter()
        .map(|emote| (emote.name, seventv_url(&emote.id)))
        .collect())
}

fn parse_bttv_global(body: &str) -> Result<Vec<(String, String)>> {
    let emotes: Vec<BttvEmote> = serde_json::from_str(body).context("Unexpected BTTV global shape")?;
    Ok(emotes
        .into_iter()
        .map(|emote| (emote.code, bttv_url(&emote.id)))
        .collect())
}

fn parse_bttv_user(body: &str) -> Result<Vec<(String, String)>> {
    let user: BttvUser = serde_json::from_str(body).context("Unexpected BTTV user shape")?;
    // Shared emotes are layered after channel emotes
    Ok(user
        .channel_emotes
        .into_iter()
        .chain(user.shared_emotes)
        .map(|emote| (emote.code, bttv_url(&emote.id)))
        .collect())
}

fn parse_ffz_global(body: &str) -> Result<Vec<(String, String)>> {
    let global: FfzGlobal = serde_json::from_str(body).context("Unexpected FFZ global shape")?;
    Ok(global
        .sets
        .into_values()
        .flat_map(|set| set.emoticons)
        .map(|emote| (emote.name, ffz_url(emote.id)))
        .collect())
}

/// Loads every configured catalog and answers token lookups
pub struct EmoteResolver {
    catalog: EmoteCatalog,
    endpoints: Endpoints,
    twitch_channel: Option<String>,
    emote_set: Option<String>,
    http_client: reqwest::Client,
    loaded: bool,
}

impl EmoteResolver {
    pub fn new(endpoints: Endpoints, twitch_channel: Option<String>, emote_set: Option<String>) -> Self {
        Self {
            catalog: EmoteCatalog::new(),
            endpoints,
            twitch_channel,
            emote_set,
            http_client: http_client(DEFAULT_REQUEST_TIMEOUT),
            loaded: false,
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        let mut resolver = Self::new(
            config.endpoints.clone(),
            config.twitch.clone(),
            config.emote_set.clone(),
        );
        resolver.http_client = http_client(config.request_timeout());
        resolver
    }

    pub fn catalog(&self) -> &EmoteCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut EmoteCatalog {
        &mut self.catalog
    }

    pub fn resolve(&self, token: &str) -> Option<&str> {
        self.catalog.resolve(token)
    }

    pub fn substitute(&self, text: &str) -> Vec<Fragment> {
        self.catalog.substitute(text)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Fetch every catalog once. Individual failures are logged and leave that
    /// provider's contribution empty.
    pub async fn load(&mut self) {
        if self.loaded {
            debug!("Emote catalogs already loaded");
            return;
        }

        let seventv_global = format!("{}/emote-sets/global", self.endpoints.seventv_api);
        self.load_into(EmoteProvider::SevenTv, "7TV global", &seventv_global, parse_seventv)
            .await;

        let bttv_global = format!("{}/cached/emotes/global", self.endpoints.bttv_api);
        self.load_into(EmoteProvider::Bttv, "BTTV global", &bttv_global, parse_bttv_global)
            .await;

        let ffz_global = format!("{}/set/global", self.endpoints.ffz_api);
        self.load_into(EmoteProvider::Ffz, "FFZ global", &ffz_global, parse_ffz_global)
            .await;

        if let Some(channel) = self.twitch_channel.clone() {
            let bttv_user = format!(
                "{}/cached/users/twitch/{}",
                self.endpoints.bttv_api,
                urlencoding::encode(&channel)
            );
            self.load_into(EmoteProvider::Bttv, "BTTV channel", &bttv_user, parse_bttv_user)
                .await;
        }

        if let Some(set_id) = self.emote_set.clone() {
            let custom_set = format!(
                "{}/emote-sets/{}",
                self.endpoints.seventv_api,
                urlencoding::encode(&set_id)
            );
            self.load_into(EmoteProvider::SevenTv, "7TV custom set", &custom_set, parse_seventv)
                .await;
        }

        self.loaded = true;
        info!(
            "Loaded emotes: {} 7TV, {} BTTV, {} FFZ",
            self.catalog.len(EmoteProvider::SevenTv),
            self.catalog.len(EmoteProvider::Bttv),
            self.catalog.len(EmoteProvider::Ffz)
        );
    }

    async fn load_into(
        &mut self,
        provider: EmoteProvider,
        label: &str,
        url: &str,
        parse: fn(&str) -> Result<Vec<(String, String)>>,
    ) {
        match self.fetch(url).await.and_then(|body| parse(&body)) {
            Ok(entries) => {
                debug!("{}: {} emotes", label, entries.len());
                self.catalog.extend(provider, entries);
            }
            Err(e) => warn!("Could not fetch {} emotes: {:#}", label, e),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("{} returned {}", url, response.status()));
        }

        response.text().await.context("Failed to read emote response body")
    }
}
