mod tarkov_dev;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub use tarkov_dev::TarkovDevClient;

const UNRESOLVED_RETRY_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata request timed out after {0:?}")]
    Timeout(Duration),

    #[error("'{0}' is not known to the metadata service")]
    NotFound(String),

    #[error("metadata transport error: {0}")]
    Transport(String),

    #[error("malformed metadata response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDescriptor {
    pub display_name: String,
    pub geometry_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestObjective {
    pub id: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestDescriptor {
    pub display_name: String,
    pub objectives: Vec<QuestObjective>,
}

/// Request/response contract of the map and quest lookup service.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn resolve_map(&self, map_id: &str) -> Result<MapDescriptor, MetadataError>;

    async fn resolve_quest(&self, quest_id: &str) -> Result<QuestDescriptor, MetadataError>;
}

/// Source used when lookups are disabled; every id stays unresolved.
pub struct OfflineMetadata;

#[async_trait]
impl MetadataSource for OfflineMetadata {
    async fn resolve_map(&self, map_id: &str) -> Result<MapDescriptor, MetadataError> {
        Err(MetadataError::NotFound(map_id.to_string()))
    }

    async fn resolve_quest(&self, quest_id: &str) -> Result<QuestDescriptor, MetadataError> {
        Err(MetadataError::NotFound(quest_id.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDisplay {
    pub map_id: String,
    pub display_name: String,
    pub geometry_ref: Option<String>,
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestDisplay {
    pub quest_id: String,
    pub display_name: String,
    pub objectives: Vec<QuestObjective>,
    pub resolved: bool,
}

#[derive(Debug, Clone)]
enum Resolution<T> {
    Pending,
    Resolved(T),
    Unresolved { since: Instant },
}

enum ResolvedMetadata {
    Map {
        map_id: String,
        result: Result<MapDescriptor, MetadataError>,
    },
    Quest {
        quest_id: String,
        result: Result<QuestDescriptor, MetadataError>,
    },
}

/// Runs lookups off the polling loop and hands results back through a
/// queue drained by the loop itself, so lookup state has a single writer.
pub struct MetadataResolver {
    source: Arc<dyn MetadataSource>,
    timeout: Duration,
    maps: HashMap<String, Resolution<MapDescriptor>>,
    quests: HashMap<String, Resolution<QuestDescriptor>>,
    results_sender: mpsc::UnboundedSender<ResolvedMetadata>,
    results_receiver: mpsc::UnboundedReceiver<ResolvedMetadata>,
}

impl MetadataResolver {
    pub fn new(source: Arc<dyn MetadataSource>, timeout: Duration) -> Self {
        let (results_sender, results_receiver) = mpsc::unbounded_channel();
        Self {
            source,
            timeout,
            maps: HashMap::new(),
            quests: HashMap::new(),
            results_sender,
            results_receiver,
        }
    }

    pub fn request_map(&mut self, map_id: &str) {
        if !needs_request(self.maps.get(map_id)) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(map_id, "No async runtime available, leaving map unresolved");
            self.maps.insert(
                map_id.to_string(),
                Resolution::Unresolved {
                    since: Instant::now(),
                },
            );
            return;
        };

        self.maps.insert(map_id.to_string(), Resolution::Pending);
        let source = Arc::clone(&self.source);
        let sender = self.results_sender.clone();
        let timeout = self.timeout;
        let map_id = map_id.to_string();
        runtime.spawn(async move {
            let result = match tokio::time::timeout(timeout, source.resolve_map(&map_id)).await {
                Ok(result) => result,
                Err(_) => Err(MetadataError::Timeout(timeout)),
            };
            if sender.send(ResolvedMetadata::Map { map_id, result }).is_err() {
                tracing::debug!("Metadata result receiver dropped");
            }
        });
    }

    pub fn request_quest(&mut self, quest_id: &str) {
        if !needs_request(self.quests.get(quest_id)) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(quest_id, "No async runtime available, leaving quest unresolved");
            self.quests.insert(
                quest_id.to_string(),
                Resolution::Unresolved {
                    since: Instant::now(),
                },
            );
            return;
        };

        self.quests.insert(quest_id.to_string(), Resolution::Pending);
        let source = Arc::clone(&self.source);
        let sender = self.results_sender.clone();
        let timeout = self.timeout;
        let quest_id = quest_id.to_string();
        runtime.spawn(async move {
            let result = match tokio::time::timeout(timeout, source.resolve_quest(&quest_id)).await
            {
                Ok(result) => result,
                Err(_) => Err(MetadataError::Timeout(timeout)),
            };
            if sender
                .send(ResolvedMetadata::Quest { quest_id, result })
                .is_err()
            {
                tracing::debug!("Metadata result receiver dropped");
            }
        });
    }

    /// Applies every lookup that finished since the last call.
    pub fn drain_results(&mut self) -> usize {
        let mut applied_count = 0;
        while let Ok(resolved) = self.results_receiver.try_recv() {
            applied_count += 1;
            match resolved {
                ResolvedMetadata::Map { map_id, result } => {
                    let resolution = into_resolution(&map_id, result);
                    self.maps.insert(map_id, resolution);
                }
                ResolvedMetadata::Quest { quest_id, result } => {
                    let resolution = into_resolution(&quest_id, result);
                    self.quests.insert(quest_id, resolution);
                }
            }
        }
        applied_count
    }

    pub fn has_pending(&self) -> bool {
        self.maps
            .values()
            .any(|resolution| matches!(resolution, Resolution::Pending))
            || self
                .quests
                .values()
                .any(|resolution| matches!(resolution, Resolution::Pending))
    }

    pub fn map_display(&self, map_id: &str) -> MapDisplay {
        match self.maps.get(map_id) {
            Some(Resolution::Resolved(descriptor)) => MapDisplay {
                map_id: map_id.to_string(),
                display_name: descriptor.display_name.clone(),
                geometry_ref: Some(descriptor.geometry_ref.clone()),
                resolved: true,
            },
            _ => MapDisplay {
                map_id: map_id.to_string(),
                display_name: map_id.to_string(),
                geometry_ref: None,
                resolved: false,
            },
        }
    }

    pub fn quest_display(&self, quest_id: &str) -> QuestDisplay {
        match self.quests.get(quest_id) {
            Some(Resolution::Resolved(descriptor)) => QuestDisplay {
                quest_id: quest_id.to_string(),
                display_name: descriptor.display_name.clone(),
                objectives: descriptor.objectives.clone(),
                resolved: true,
            },
            _ => QuestDisplay {
                quest_id: quest_id.to_string(),
                display_name: quest_id.to_string(),
                objectives: Vec::new(),
                resolved: false,
            },
        }
    }
}

fn needs_request<T>(resolution: Option<&Resolution<T>>) -> bool {
    match resolution {
        None => true,
        Some(Resolution::Pending | Resolution::Resolved(_)) => false,
        Some(Resolution::Unresolved { since }) => since.elapsed() >= UNRESOLVED_RETRY_INTERVAL,
    }
}

fn into_resolution<T>(id: &str, result: Result<T, MetadataError>) -> Resolution<T> {
    match result {
        Ok(descriptor) => Resolution::Resolved(descriptor),
        Err(error) => {
            tracing::warn!(id, metadata_error = %error, "Metadata lookup failed, showing raw id");
            Resolution::Unresolved {
                since: Instant::now(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        MapDescriptor, MetadataError, MetadataResolver, MetadataSource, OfflineMetadata,
        QuestDescriptor, QuestObjective,
    };
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedMetadata;

    #[async_trait]
    impl MetadataSource for FixedMetadata {
        async fn resolve_map(&self, map_id: &str) -> Result<MapDescriptor, MetadataError> {
            match map_id {
                "customs" => Ok(MapDescriptor {
                    display_name: "Customs".to_string(),
                    geometry_ref: "customs".to_string(),
                }),
                _ => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(MetadataError::NotFound(map_id.to_string()))
                }
            }
        }

        async fn resolve_quest(&self, quest_id: &str) -> Result<QuestDescriptor, MetadataError> {
            Ok(QuestDescriptor {
                display_name: format!("Quest {quest_id}"),
                objectives: vec![QuestObjective {
                    id: "o1".to_string(),
                    description: "Find the stash".to_string(),
                }],
            })
        }
    }

    async fn settle(resolver: &mut MetadataResolver) {
        for _ in 0..100 {
            resolver.drain_results();
            if !resolver.has_pending() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("Metadata lookups did not settle");
    }

    #[tokio::test]
    async fn resolves_known_map_and_quest() {
        let mut resolver = MetadataResolver::new(Arc::new(FixedMetadata), Duration::from_secs(1));
        resolver.request_map("customs");
        resolver.request_quest("q1");
        assert!(!resolver.map_display("customs").resolved, "Pending shows raw id");

        settle(&mut resolver).await;

        let map = resolver.map_display("customs");
        assert!(map.resolved);
        assert_eq!(map.display_name, "Customs");
        assert_eq!(map.geometry_ref.as_deref(), Some("customs"));

        let quest = resolver.quest_display("q1");
        assert!(quest.resolved);
        assert_eq!(quest.display_name, "Quest q1");
        assert_eq!(quest.objectives.len(), 1);
    }

    #[tokio::test]
    async fn timed_out_lookup_falls_back_to_raw_id() {
        let mut resolver =
            MetadataResolver::new(Arc::new(FixedMetadata), Duration::from_millis(20));
        resolver.request_map("labyrinth");
        settle(&mut resolver).await;

        let map = resolver.map_display("labyrinth");
        assert!(!map.resolved);
        assert_eq!(map.display_name, "labyrinth");
        assert_eq!(map.geometry_ref, None);

        resolver.request_map("labyrinth");
        assert!(!resolver.has_pending(), "Failed ids are not retried immediately");
    }

    #[tokio::test]
    async fn offline_source_never_resolves() {
        let mut resolver =
            MetadataResolver::new(Arc::new(OfflineMetadata), Duration::from_millis(50));
        resolver.request_map("woods");
        resolver.request_quest("q9");
        settle(&mut resolver).await;

        assert!(!resolver.map_display("woods").resolved);
        assert_eq!(resolver.quest_display("q9").display_name, "q9");
    }

    #[test]
    fn without_runtime_ids_stay_unresolved() {
        let mut resolver = MetadataResolver::new(Arc::new(FixedMetadata), Duration::from_secs(1));
        resolver.request_map("customs");

        assert!(!resolver.has_pending());
        assert_eq!(resolver.map_display("customs").display_name, "customs");
    }
}
