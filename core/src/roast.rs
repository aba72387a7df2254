/*
    music-roast | Rust CLI tool that roasts your Spotify listening habits.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::TasteReport;

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const EMPTY_REPORT_ROAST: &str =
    "I can't roast you, there are no tracks here. Spotify thinks you're a musical ghost.";

#[derive(Error, Debug)]
pub enum RoastError {
    #[error("Missing GEMINI_API_KEY")]
    MissingApiKey,
    #[error("Gemini request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Gemini API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Gemini returned no text")]
    EmptyResponse,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Asks Gemini for a roast of the user's listening data.
pub struct RoastGenerator {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl RoastGenerator {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Reads `GEMINI_API_KEY` and the optional `GEMINI_MODEL`.
    pub fn from_env() -> Result<Self, RoastError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, RoastError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GEMINI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or(RoastError::MissingApiKey)?;
        let generator = Self::new(api_key);
        Ok(match lookup("GEMINI_MODEL").filter(|m| !m.trim().is_empty()) {
            Some(model) => generator.with_model(model),
            None => generator,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn roast(&self, report: &TasteReport) -> Result<String, RoastError> {
        if report.is_empty() {
            return Ok(EMPTY_REPORT_ROAST.to_string());
        }

        let prompt = build_prompt(report);
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: &prompt }],
            }],
        };
        let url = format!("{}/{}:generateContent", GEMINI_ENDPOINT, self.model);
        debug!("Requesting roast from {}", url);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&raw)
                .map(|e| e.error.message)
                .unwrap_or(raw);
            return Err(RoastError::Api {
                status: status.as_u16(),
                message,
            });
        }

        extract_text(&raw)
    }
}

fn build_prompt(report: &TasteReport) -> String {
    format!(
        "Roast this person's music taste based on their top Spotify tracks and genres. \
         Be witty and sarcastic, keep it playful with no slurs or abuse, 3 to 5 sentences.\n---\n{}\n---",
        report.listing()
    )
}

fn extract_text(raw: &str) -> Result<String, RoastError> {
    let parsed: GenerateResponse =
        serde_json::from_str(raw).map_err(|_| RoastError::EmptyResponse)?;
    let text = parsed
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .filter_map(|p| p.text)
        .collect::<Vec<_>>()
        .join("");
    let text = text.trim();
    if text.is_empty() {
        Err(RoastError::EmptyResponse)
    } else {
        Ok(text.to_string())
    }
}
