//! Connection authentication: handshake credentials and project membership.
//!
//! The checks run in a fixed order so the first failing one decides which
//! of the two client-visible rejections is surfaced:
//! 1. `projectId` present and well-formed, else `InvalidProject`
//! 2. project exists in the directory, else `InvalidProject`
//! 3. token present, else `Unauthenticated`
//! 4. token verifies (signature + expiry), else `Unauthenticated`
//!
//! Clients only ever see the two coarse messages; everything finer is
//! logged server-side.

use std::collections::HashMap;
use std::fmt;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Terminal handshake rejection. `Display` yields the exact wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid projectId")]
    InvalidProject,
    #[error("Authentication error")]
    Unauthenticated,
}

// ---------------------------------------------------------------------------
// Project identifiers and snapshots
// ---------------------------------------------------------------------------

/// Identifier in the external project store's format: exactly 24 hex
/// characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        if raw.len() == 24 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(ProjectId(raw.to_string()))
        } else {
            Err(AuthError::InvalidProject)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Project snapshot returned by the directory at admission time. The
/// relay never re-fetches it for the life of a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub users: Vec<String>,
}

// ---------------------------------------------------------------------------
// Token verification
// ---------------------------------------------------------------------------

/// Identity asserted by a verified token. The relay only cares about the
/// email-like identifier; expiry is enforced during verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub email: String,
    #[serde(default)]
    pub iat: u64,
    pub exp: u64,
}

/// HS256 verifier bound to the shared secret.
pub struct TokenVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        TokenVerifier {
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify signature and expiry. All failure detail collapses into
    /// `Unauthenticated`.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| {
                tracing::debug!(error = %err, "token rejected");
                AuthError::Unauthenticated
            })
    }
}

// ---------------------------------------------------------------------------
// Project directory (external collaborator)
// ---------------------------------------------------------------------------

/// Read-only project lookup. `Http` queries the CRUD backend that owns
/// the project store; `Fixed` serves a static map for tests and
/// single-box development.
pub enum ProjectDirectory {
    Http {
        client: reqwest::Client,
        base_url: String,
    },
    Fixed(HashMap<ProjectId, Project>),
}

#[derive(Debug, Deserialize)]
struct ProjectLookupResponse {
    project: Project,
}

impl ProjectDirectory {
    pub fn http(base_url: impl Into<String>) -> Self {
        ProjectDirectory::Http {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn fixed(projects: impl IntoIterator<Item = Project>) -> Self {
        ProjectDirectory::Fixed(
            projects
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
        )
    }

    /// Look up a project snapshot. Transport failures and non-2xx
    /// responses are logged and reported as absent.
    pub async fn find_project(&self, id: &ProjectId) -> Option<Project> {
        match self {
            ProjectDirectory::Fixed(projects) => projects.get(id).cloned(),
            ProjectDirectory::Http { client, base_url } => {
                let url = format!(
                    "{}/projects/get-project/{}",
                    base_url.trim_end_matches('/'),
                    id
                );
                let response = match client.get(&url).send().await {
                    Ok(r) => r,
                    Err(err) => {
                        tracing::warn!(%url, error = %err, "project lookup failed");
                        return None;
                    }
                };
                if !response.status().is_success() {
                    tracing::debug!(%url, status = %response.status(), "project not found");
                    return None;
                }
                match response.json::<ProjectLookupResponse>().await {
                    Ok(body) => Some(body.project),
                    Err(err) => {
                        tracing::warn!(%url, error = %err, "malformed project response");
                        None
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake → Session
// ---------------------------------------------------------------------------

/// Logical handshake fields, already extracted from the transport.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub project_id: Option<String>,
    pub token: Option<String>,
}

/// Server-side state for one admitted connection. The project snapshot
/// is captured here and never refreshed.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub claims: Claims,
    pub project: Project,
    pub room_id: String,
}

/// Run the admission checks in order and build the session.
///
/// A project that fails lookup is a terminal `InvalidProject` rejection;
/// no session ever carries an absent project.
pub async fn authenticate(
    handshake: &Handshake,
    verifier: &TokenVerifier,
    directory: &ProjectDirectory,
) -> Result<Session, AuthError> {
    let raw_id = handshake
        .project_id
        .as_deref()
        .ok_or(AuthError::InvalidProject)?;
    let project_id = ProjectId::parse(raw_id)?;

    let project = directory
        .find_project(&project_id)
        .await
        .ok_or(AuthError::InvalidProject)?;

    let token = handshake
        .token
        .as_deref()
        .ok_or(AuthError::Unauthenticated)?;
    let claims = verifier.verify(token)?;

    let room_id = project.id.to_string();
    Ok(Session {
        id: Uuid::new_v4(),
        claims,
        project,
        room_id,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
