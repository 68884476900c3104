//! Durable source registry.
//!
//! All mutations go through one actor task that owns the repository, so
//! concurrent triggers never interleave writes. Callers hold a cheap
//! [`SourceRegistry`] handle and talk to the actor over a channel.

use tokio::sync::{mpsc, oneshot};

use crate::core::storage::{Source, SourceId, SourceRepository, StorageError};

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("source {0} not found")]
    NotFound(SourceId),
    #[error("source already registered: {0}")]
    Duplicate(String),
    #[error("registry persistence failed: {0}")]
    Persistence(#[from] StorageError),
    #[error("registry actor is no longer running")]
    Closed,
}

/// Immutable view of the registry: pinned sources first, each partition in
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub pinned: Vec<Source>,
    pub unpinned: Vec<Source>,
}

impl RegistrySnapshot {
    pub fn all(&self) -> impl Iterator<Item = &Source> {
        self.pinned.iter().chain(self.unpinned.iter())
    }

    pub fn len(&self) -> usize {
        self.pinned.len() + self.unpinned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_sources(self) -> Vec<Source> {
        let mut sources = self.pinned;
        sources.extend(self.unpinned);
        sources
    }
}

type Reply<T> = oneshot::Sender<Result<T, RegistryError>>;

enum Command {
    Create { url: String, reply: Reply<Source> },
    Register { url: String, title: String, reply: Reply<Source> },
    Rename { id: SourceId, title: String, reply: Reply<()> },
    SetPinned { id: SourceId, is_pinned: bool, reply: Reply<()> },
    Delete { id: SourceId, reply: Reply<()> },
    Get { id: SourceId, reply: Reply<Source> },
    List { reply: Reply<RegistrySnapshot> },
}

#[derive(Debug, Clone)]
pub struct SourceRegistry {
    commands: mpsc::Sender<Command>,
}

impl SourceRegistry {
    /// Starts the writer task. It stops once every handle has been dropped.
    pub fn spawn(repository: SourceRepository) -> Self {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(run_actor(repository, receiver));
        Self { commands }
    }

    /// Registers a new URL with no title yet.
    pub async fn create(&self, url: &str) -> Result<Source, RegistryError> {
        let url = url.to_string();
        self.request(|reply| Command::Create { url, reply }).await
    }

    /// Registers a URL under its title in one actor turn. Fails with
    /// `Duplicate` when any source already has the same URL or title.
    pub async fn register(&self, url: &str, title: &str) -> Result<Source, RegistryError> {
        let url = url.to_string();
        let title = title.to_string();
        self.request(|reply| Command::Register { url, title, reply }).await
    }

    pub async fn rename(&self, id: SourceId, title: &str) -> Result<(), RegistryError> {
        let title = title.to_string();
        self.request(|reply| Command::Rename { id, title, reply }).await
    }

    pub async fn set_pinned(&self, id: SourceId, is_pinned: bool) -> Result<(), RegistryError> {
        self.request(|reply| Command::SetPinned {
            id,
            is_pinned,
            reply,
        })
        .await
    }

    pub async fn delete(&self, id: SourceId) -> Result<(), RegistryError> {
        self.request(|reply| Command::Delete { id, reply }).await
    }

    pub async fn get(&self, id: SourceId) -> Result<Source, RegistryError> {
        self.request(|reply| Command::Get { id, reply }).await
    }

    pub async fn list(&self) -> Result<RegistrySnapshot, RegistryError> {
        self.request(|reply| Command::List { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, RegistryError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| RegistryError::Closed)?;
        response.await.map_err(|_| RegistryError::Closed)?
    }
}

async fn run_actor(repository: SourceRepository, mut receiver: mpsc::Receiver<Command>) {
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Create { url, reply } => {
                let _ = reply.send(create(&repository, &url).await);
            }
            Command::Register { url, title, reply } => {
                let _ = reply.send(register(&repository, &url, &title).await);
            }
            Command::Rename { id, title, reply } => {
                let result = repository
                    .rename_source(id, &title)
                    .await
                    .map_err(RegistryError::from)
                    .and_then(|affected| require_row(id, affected));
                let _ = reply.send(result);
            }
            Command::SetPinned {
                id,
                is_pinned,
                reply,
            } => {
                let result = repository
                    .set_source_pinned(id, is_pinned)
                    .await
                    .map_err(RegistryError::from)
                    .and_then(|affected| require_row(id, affected));
                let _ = reply.send(result);
            }
            Command::Delete { id, reply } => {
                let result = repository
                    .delete_source(id)
                    .await
                    .map_err(RegistryError::from)
                    .and_then(|affected| require_row(id, affected));
                let _ = reply.send(result);
            }
            Command::Get { id, reply } => {
                let result = match repository.get_source_by_id(id).await {
                    Ok(Some(record)) => Ok(Source::from(record)),
                    Ok(None) => Err(RegistryError::NotFound(id)),
                    Err(error) => Err(error.into()),
                };
                let _ = reply.send(result);
            }
            Command::List { reply } => {
                let _ = reply.send(snapshot(&repository).await);
            }
        }
    }
    tracing::debug!("source registry actor stopped");
}

async fn create(repository: &SourceRepository, url: &str) -> Result<Source, RegistryError> {
    match repository.insert_source(url).await {
        Ok(record) => {
            let source = Source::from(record);
            tracing::info!(source_id = %source.id, url, "source registered");
            Ok(source)
        }
        Err(error) if error.is_unique_violation() => Err(RegistryError::Duplicate(url.to_string())),
        Err(error) => Err(error.into()),
    }
}

async fn register(repository: &SourceRepository, url: &str, title: &str) -> Result<Source, RegistryError> {
    if let Some(existing) = repository.find_source_by_url_or_title(url, title).await? {
        tracing::info!(existing_id = existing.id, url, title, "source conflicts with existing entry");
        return Err(RegistryError::Duplicate(url.to_string()));
    }
    match repository.insert_titled_source(url, title).await {
        Ok(record) => {
            let source = Source::from(record);
            tracing::info!(source_id = %source.id, url, title, "source registered");
            Ok(source)
        }
        Err(error) if error.is_unique_violation() => Err(RegistryError::Duplicate(url.to_string())),
        Err(error) => Err(error.into()),
    }
}

async fn snapshot(repository: &SourceRepository) -> Result<RegistrySnapshot, RegistryError> {
    let pinned = repository.list_sources_by_pin(true).await?;
    let unpinned = repository.list_sources_by_pin(false).await?;
    Ok(RegistrySnapshot {
        pinned: pinned.into_iter().map(Source::from).collect(),
        unpinned: unpinned.into_iter().map(Source::from).collect(),
    })
}

fn require_row(id: SourceId, affected: u64) -> Result<(), RegistryError> {
    if affected == 0 {
        Err(RegistryError::NotFound(id))
    } else {
        Ok(())
    }
}
