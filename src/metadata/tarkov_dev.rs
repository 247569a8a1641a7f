use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{MapDescriptor, MetadataError, MetadataSource, QuestDescriptor, QuestObjective};

const MAPS_QUERY: &str = "query { maps { id name normalizedName } }";
const TASKS_QUERY: &str =
    "query { tasks { id name normalizedName objectives { id description } } }";

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct MapsData {
    maps: Vec<MapRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapRecord {
    id: String,
    name: String,
    normalized_name: String,
}

#[derive(Debug, Deserialize)]
struct TasksData {
    tasks: Vec<TaskRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRecord {
    id: String,
    name: String,
    #[serde(default)]
    normalized_name: Option<String>,
    #[serde(default)]
    objectives: Vec<ObjectiveRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct ObjectiveRecord {
    id: String,
    #[serde(default)]
    description: String,
}

struct CachedList<T> {
    fetched_at: Instant,
    records: Vec<T>,
}

/// GraphQL client for the tarkov.dev API. Whole map and task lists are
/// fetched once per cache period and searched locally.
pub struct TarkovDevClient {
    http_client: reqwest::Client,
    endpoint: String,
    cache_ttl: Duration,
    maps: Mutex<Option<CachedList<MapRecord>>>,
    tasks: Mutex<Option<CachedList<TaskRecord>>>,
}

impl TarkovDevClient {
    pub fn new(
        endpoint: impl Into<String>,
        request_timeout: Duration,
        cache_ttl: Duration,
    ) -> Result<Self, MetadataError> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| MetadataError::Transport(error.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            cache_ttl,
            maps: Mutex::new(None),
            tasks: Mutex::new(None),
        })
    }

    async fn query<T: for<'de> Deserialize<'de>>(&self, query: &str) -> Result<T, MetadataError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": {} }))
            .send()
            .await
            .map_err(|error| MetadataError::Transport(error.to_string()))?
            .error_for_status()
            .map_err(|error| MetadataError::Transport(error.to_string()))?;

        let body = response
            .text()
            .await
            .map_err(|error| MetadataError::Transport(error.to_string()))?;
        parse_graphql_response(&body)
    }

    async fn map_records(&self) -> Result<Vec<MapRecord>, MetadataError> {
        let mut cache = self.maps.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                return Ok(cached.records.clone());
            }
        }

        let data: MapsData = self.query(MAPS_QUERY).await?;
        *cache = Some(CachedList {
            fetched_at: Instant::now(),
            records: data.maps.clone(),
        });
        Ok(data.maps)
    }

    async fn task_records(&self) -> Result<Vec<TaskRecord>, MetadataError> {
        let mut cache = self.tasks.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                return Ok(cached.records.clone());
            }
        }

        let data: TasksData = self.query(TASKS_QUERY).await?;
        *cache = Some(CachedList {
            fetched_at: Instant::now(),
            records: data.tasks.clone(),
        });
        Ok(data.tasks)
    }
}

#[async_trait]
impl MetadataSource for TarkovDevClient {
    async fn resolve_map(&self, map_id: &str) -> Result<MapDescriptor, MetadataError> {
        let maps = self.map_records().await?;
        find_map(&maps, map_id).ok_or_else(|| MetadataError::NotFound(map_id.to_string()))
    }

    async fn resolve_quest(&self, quest_id: &str) -> Result<QuestDescriptor, MetadataError> {
        let tasks = self.task_records().await?;
        find_quest(&tasks, quest_id).ok_or_else(|| MetadataError::NotFound(quest_id.to_string()))
    }
}

fn parse_graphql_response<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, MetadataError> {
    let response = serde_json::from_str::<GraphqlResponse<T>>(body)
        .map_err(|error| MetadataError::Malformed(error.to_string()))?;

    if let Some(first_error) = response.errors.first() {
        return Err(MetadataError::Malformed(first_error.message.clone()));
    }

    response
        .data
        .ok_or_else(|| MetadataError::Malformed("response has no data".to_string()))
}

fn find_map(maps: &[MapRecord], map_id: &str) -> Option<MapDescriptor> {
    maps.iter()
        .find(|map| {
            map.normalized_name.eq_ignore_ascii_case(map_id)
                || map.id == map_id
                || map.name.eq_ignore_ascii_case(map_id)
        })
        .map(|map| MapDescriptor {
            display_name: map.name.clone(),
            geometry_ref: map.normalized_name.clone(),
        })
}

fn find_quest(tasks: &[TaskRecord], quest_id: &str) -> Option<QuestDescriptor> {
    tasks
        .iter()
        .find(|task| {
            task.id == quest_id
                || task
                    .normalized_name
                    .as_deref()
                    .map(|name| name.eq_ignore_ascii_case(quest_id))
                    .unwrap_or(false)
        })
        .map(|task| QuestDescriptor {
            display_name: task.name.clone(),
            objectives: task
                .objectives
                .iter()
                .map(|objective| QuestObjective {
                    id: objective.id.clone(),
                    description: objective.description.clone(),
                })
                .collect(),
        })
}

#[cfg(test)]
mod tests {
    use super::{find_map, find_quest, parse_graphql_response, MapsData, TasksData};
    use crate::metadata::MetadataError;

    const MAPS_BODY: &str = r#"{"data":{"maps":[
        {"id":"56f40101d2720b2a4d8b45d6","name":"Customs","normalizedName":"customs"},
        {"id":"5704e3c2d2720bac5b8b4567","name":"Woods","normalizedName":"woods"}
    ]}}"#;

    #[test]
    fn resolves_maps_by_normalized_name_or_id() {
        let data: MapsData = parse_graphql_response(MAPS_BODY).expect("Fixture should parse");

        let by_name = find_map(&data.maps, "Customs").expect("Customs should resolve");
        assert_eq!(by_name.display_name, "Customs");
        assert_eq!(by_name.geometry_ref, "customs");

        let by_id = find_map(&data.maps, "5704e3c2d2720bac5b8b4567").expect("Woods id should resolve");
        assert_eq!(by_id.display_name, "Woods");

        assert!(find_map(&data.maps, "lighthouse").is_none());
    }

    #[test]
    fn resolves_quests_with_objectives() {
        let body = r#"{"data":{"tasks":[{"id":"5936d90786f7742b1420ba5b","name":"Debut",
            "normalizedName":"debut","objectives":[{"id":"obj1","description":"Eliminate Scavs"}]}]}}"#;
        let data: TasksData = parse_graphql_response(body).expect("Fixture should parse");

        let quest = find_quest(&data.tasks, "debut").expect("Debut should resolve");
        assert_eq!(quest.display_name, "Debut");
        assert_eq!(quest.objectives[0].description, "Eliminate Scavs");
        assert!(find_quest(&data.tasks, "unknown").is_none());
    }

    #[test]
    fn graphql_errors_are_malformed_responses() {
        let body = r#"{"errors":[{"message":"Syntax Error"}],"data":null}"#;
        let result = parse_graphql_response::<MapsData>(body);
        assert!(matches!(result, Err(MetadataError::Malformed(message)) if message == "Syntax Error"));

        let result = parse_graphql_response::<MapsData>("<html>bad gateway</html>");
        assert!(matches!(result, Err(MetadataError::Malformed(_))));
    }
}
