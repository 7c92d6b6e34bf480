//! 지식 그래프 - 엔티티/관계 그래프
//!
//! 청크 풀에서 추출한 엔티티와 관계로 방향성 그래프를 구성합니다.
//!
//! - 엔티티 병합: 대소문자 무시 이름 일치, 또는 같은 타입 + Levenshtein 비율 > 임계값
//! - 관계: (주어, 술어, 목적어)가 같으면 하나로 병합
//! - 중요도: `0.4*degree + 0.3*betweenness + 0.3*freq/max_freq`
//!
//! ref: https://en.wikipedia.org/wiki/Betweenness_centrality (Brandes)

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RagError;

use super::extractor::EntityExtractor;
use super::types::DocumentChunk;

// ============================================================================
// Configuration
// ============================================================================

/// 그래프 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// BFS 확장 최대 홉 수
    pub max_hops: usize,
    /// 엔티티 병합 유사도 임계값 (Levenshtein 비율)
    pub similarity_threshold: f64,
    /// 멘션 폴백으로 고르는 최대 엔티티 수
    pub fallback_entity_limit: usize,
    /// 멘션 폴백에 쓰는 쿼리 단어 최소 길이
    pub fallback_min_word_len: usize,
    /// 첫 그래프 쿼리가 구축 완료를 기다릴지 여부
    pub wait_for_build: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_hops: 2,
            similarity_threshold: 0.8,
            fallback_entity_limit: 5,
            fallback_min_word_len: 3,
            wait_for_build: true,
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// 엔티티
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    /// 표면형 (순서 유지, 중복 없음)
    pub mentions: Vec<String>,
    pub frequency: u32,
    pub importance_score: f64,
}

/// 관계 (방향성, 레이블 있음)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub subject_id: String,
    pub predicate: String,
    pub object_id: String,
    pub confidence: f64,
    pub source_chunk_ids: Vec<String>,
}

/// BFS로 도달한 엔티티
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedEntity {
    pub entity_id: String,
    /// 시작 엔티티로부터의 홉 수
    pub hops: usize,
    /// 술어 경로 (예: "uses-implements")
    pub path: String,
}

/// 그래프 구축 결과
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    pub chunks: usize,
    pub entities: usize,
    pub relations: usize,
    /// 청크별 추출 실패 (`GraphBuildFailure`)
    pub errors: Vec<RagError>,
}

impl BuildReport {
    pub fn failures(&self) -> usize {
        self.errors.len()
    }

    pub fn degraded(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// 엔티티 ID (타입 + 소문자 이름에서 결정적으로 생성)
pub fn entity_id(entity_type: &str, name: &str) -> String {
    let digest = Sha256::digest(format!("{}|{}", entity_type, name.to_lowercase()).as_bytes());
    format!("ent_{}", hex_prefix(&digest))
}

/// 관계 ID (주어/술어/목적어에서 결정적으로 생성)
pub fn relation_id(subject_id: &str, predicate: &str, object_id: &str) -> String {
    let digest = Sha256::digest(format!("{}|{}|{}", subject_id, predicate, object_id).as_bytes());
    format!("rel_{}", hex_prefix(&digest))
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// String Similarity
// ============================================================================

/// Levenshtein 편집 거리 (문자 단위)
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1).min(current[j] + 1).min(substitution);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// 유사도 비율 `(len(longer) - distance) / len(longer)`
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let longer = a.chars().count().max(b.chars().count());
    if longer == 0 {
        return 0.0;
    }
    (longer - levenshtein(a, b)) as f64 / longer as f64
}

// ============================================================================
// KnowledgeGraph
// ============================================================================

/// 지식 그래프
///
/// 노드 가중치는 엔티티 ID, 간선 가중치는 관계 ID입니다.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    graph: DiGraph<String, String>,
    nodes: HashMap<String, NodeIndex>,
    entities: HashMap<String, Entity>,
    relations: HashMap<String, Relation>,
    /// 소문자 멘션 -> 엔티티 ID
    mention_index: HashMap<String, BTreeSet<String>>,
    /// 이미 병합된 (청크 ID, 타입, 소문자 이름)
    merged_occurrences: HashSet<(String, String, String)>,
    similarity_threshold: f64,
}

impl KnowledgeGraph {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
            ..Default::default()
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn relation(&self, id: &str) -> Option<&Relation> {
        self.relations.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// 중요도 상위 엔티티 (동점은 이름 순)
    pub fn top_entities(&self, limit: usize) -> Vec<&Entity> {
        let mut all: Vec<&Entity> = self.entities.values().collect();
        all.sort_by(|a, b| {
            b.importance_score
                .partial_cmp(&a.importance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        all.truncate(limit);
        all
    }

    /// 병합 대상 엔티티 찾기
    ///
    /// 대소문자 무시 이름 일치가 우선이며, 없으면 같은 타입 중 유사도 비율이
    /// 임계값을 넘는 가장 가까운 엔티티를 고릅니다.
    pub fn find_similar(&self, name: &str, entity_type: &str) -> Option<&Entity> {
        let lower = name.to_lowercase();

        let mut exact: Vec<&Entity> = self
            .entities
            .values()
            .filter(|e| e.name.to_lowercase() == lower)
            .collect();
        if !exact.is_empty() {
            exact.sort_by(|a, b| a.id.cmp(&b.id));
            return exact.first().copied();
        }

        self.entities
            .values()
            .filter(|e| e.entity_type == entity_type)
            .map(|e| (e, similarity_ratio(&e.name.to_lowercase(), &lower)))
            .filter(|(_, ratio)| *ratio > self.similarity_threshold)
            .max_by(|(a, ra), (b, rb)| {
                ra.partial_cmp(rb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|(e, _)| e)
    }

    /// 엔티티 병합 또는 추가
    ///
    /// 기존 엔티티에 병합하면 멘션을 합치고 빈도를 1 올립니다.
    ///
    /// # Returns
    /// 병합되거나 추가된 엔티티 ID
    pub fn merge_entity(&mut self, name: &str, entity_type: &str, mentions: &[String]) -> String {
        let name = name.trim();
        let mut surface: Vec<String> = mentions.to_vec();
        if surface.is_empty() {
            surface.push(name.to_string());
        }

        let existing = self.find_similar(name, entity_type).map(|e| e.id.clone());
        let id = match existing {
            Some(id) => id,
            None => {
                let id = entity_id(entity_type, name);
                self.entities.insert(
                    id.clone(),
                    Entity {
                        id: id.clone(),
                        name: name.to_string(),
                        entity_type: entity_type.to_string(),
                        mentions: Vec::new(),
                        frequency: 0,
                        importance_score: 0.0,
                    },
                );
                let node = self.graph.add_node(id.clone());
                self.nodes.insert(id.clone(), node);
                id
            }
        };

        if let Some(entity) = self.entities.get_mut(&id) {
            entity.frequency += 1;
            for mention in surface {
                let mention = mention.trim().to_string();
                if mention.is_empty() {
                    continue;
                }
                self.mention_index
                    .entry(mention.to_lowercase())
                    .or_default()
                    .insert(id.clone());
                if !entity.mentions.iter().any(|m| m.eq_ignore_ascii_case(&mention)) {
                    entity.mentions.push(mention);
                }
            }
        }

        id
    }

    /// 청크에서 추출한 엔티티 병합
    ///
    /// 같은 청크의 같은 후보는 한 번만 빈도에 반영되므로, 같은 청크로
    /// 다시 구축해도 엔티티가 바뀌지 않습니다.
    pub fn merge_chunk_entity(&mut self, chunk_id: &str, name: &str, entity_type: &str) -> String {
        let key = (
            chunk_id.to_string(),
            entity_type.to_string(),
            name.trim().to_lowercase(),
        );
        if self.merged_occurrences.contains(&key) {
            if let Some(entity) = self.find_similar(name, entity_type) {
                return entity.id.clone();
            }
        }

        self.merged_occurrences.insert(key);
        self.merge_entity(name, entity_type, &[name.to_string()])
    }

    /// 관계 추가
    ///
    /// 양 끝 엔티티가 없거나 자기 자신을 가리키면 무시합니다.
    /// 같은 삼중항이 이미 있으면 출처 청크를 합치고 신뢰도는 최댓값을 유지합니다.
    pub fn add_relation(
        &mut self,
        subject_id: &str,
        predicate: &str,
        object_id: &str,
        confidence: f64,
        chunk_id: &str,
    ) -> Option<String> {
        if subject_id == object_id {
            return None;
        }
        let (&from, &to) = (self.nodes.get(subject_id)?, self.nodes.get(object_id)?);

        let predicate = predicate.trim().to_lowercase();
        let id = relation_id(subject_id, &predicate, object_id);

        match self.relations.get_mut(&id) {
            Some(existing) => {
                existing.confidence = existing.confidence.max(confidence);
                if !existing.source_chunk_ids.iter().any(|c| c == chunk_id) {
                    existing.source_chunk_ids.push(chunk_id.to_string());
                }
            }
            None => {
                self.graph.add_edge(from, to, id.clone());
                self.relations.insert(
                    id.clone(),
                    Relation {
                        id: id.clone(),
                        subject_id: subject_id.to_string(),
                        predicate,
                        object_id: object_id.to_string(),
                        confidence,
                        source_chunk_ids: vec![chunk_id.to_string()],
                    },
                );
            }
        }

        Some(id)
    }

    /// 멘션으로 엔티티 찾기 (정확 일치 + 양방향 부분 문자열)
    pub fn find_entities_by_mention(&self, text: &str) -> Vec<&Entity> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let mut ids: BTreeSet<&String> = BTreeSet::new();
        for (mention, entity_ids) in &self.mention_index {
            if mention.contains(&needle) || needle.contains(mention.as_str()) {
                ids.extend(entity_ids.iter());
            }
        }

        ids.into_iter().filter_map(|id| self.entities.get(id)).collect()
    }

    /// 텍스트에 멘션이 등장하는 엔티티 ID
    pub fn entities_in_text<'a>(
        &self,
        text: &str,
        candidates: impl IntoIterator<Item = &'a String>,
    ) -> HashSet<String> {
        let content = text.to_lowercase();
        candidates
            .into_iter()
            .filter(|id| {
                self.entities.get(*id).is_some_and(|e| {
                    e.mentions
                        .iter()
                        .any(|m| content.contains(&m.to_lowercase()))
                })
            })
            .cloned()
            .collect()
    }

    /// BFS로 관련 엔티티 탐색 (나가는 간선만)
    ///
    /// 시작 엔티티는 포함하지 않으며, 각 엔티티는 최단 홉 거리로 한 번만 기록됩니다.
    pub fn related_entities(&self, entity_id: &str, max_hops: usize) -> Vec<RelatedEntity> {
        let Some(&start) = self.nodes.get(entity_id) else {
            return Vec::new();
        };

        let mut related = Vec::new();
        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut queue: VecDeque<(NodeIndex, usize, String)> = VecDeque::from([(start, 0, String::new())]);

        while let Some((node, hops, path)) = queue.pop_front() {
            if hops >= max_hops {
                continue;
            }

            let mut edges: Vec<(NodeIndex, &str)> = self
                .graph
                .edges_directed(node, Direction::Outgoing)
                .filter_map(|edge| {
                    let relation = self.relations.get(edge.weight())?;
                    Some((edge.target(), relation.predicate.as_str()))
                })
                .collect();
            edges.sort_by(|a, b| a.1.cmp(b.1).then_with(|| self.graph[a.0].cmp(&self.graph[b.0])));

            for (target, predicate) in edges {
                if !visited.insert(target) {
                    continue;
                }
                let next_path = if path.is_empty() {
                    predicate.to_string()
                } else {
                    format!("{}-{}", path, predicate)
                };
                related.push(RelatedEntity {
                    entity_id: self.graph[target].clone(),
                    hops: hops + 1,
                    path: next_path.clone(),
                });
                queue.push_back((target, hops + 1, next_path));
            }
        }

        related
    }

    /// 엔티티 중요도 계산
    ///
    /// 엔티티가 2개 미만이거나 관계가 없거나 `frequency_only`이면 빈도 비율만 사용합니다.
    pub fn compute_importance(&mut self, frequency_only: bool) {
        let n = self.entities.len();
        if n == 0 {
            return;
        }

        let max_freq = self
            .entities
            .values()
            .map(|e| e.frequency)
            .max()
            .unwrap_or(1)
            .max(1) as f64;

        if frequency_only || n < 2 || self.relations.is_empty() {
            for entity in self.entities.values_mut() {
                entity.importance_score = entity.frequency as f64 / max_freq;
            }
            return;
        }

        let degree = self.degree_centrality();
        let betweenness = self.betweenness_centrality();

        for entity in self.entities.values_mut() {
            let Some(node) = self.nodes.get(&entity.id) else {
                continue;
            };
            let d = degree.get(node).copied().unwrap_or(0.0);
            let b = betweenness.get(node).copied().unwrap_or(0.0);
            let f = entity.frequency as f64 / max_freq;
            entity.importance_score = (0.4 * d + 0.3 * b + 0.3 * f).clamp(0.0, 1.0);
        }
    }

    /// 고유 이웃 수 / (n - 1)
    fn degree_centrality(&self) -> HashMap<NodeIndex, f64> {
        let n = self.graph.node_count();
        let denom = (n.saturating_sub(1)).max(1) as f64;

        self.graph
            .node_indices()
            .map(|node| {
                let neighbours: HashSet<NodeIndex> = self
                    .graph
                    .neighbors_undirected(node)
                    .filter(|other| *other != node)
                    .collect();
                (node, neighbours.len() as f64 / denom)
            })
            .collect()
    }

    /// Brandes 매개 중심성 (방향 그래프, 가중치 없음)
    fn betweenness_centrality(&self) -> HashMap<NodeIndex, f64> {
        let n = self.graph.node_count();
        let mut centrality: HashMap<NodeIndex, f64> =
            self.graph.node_indices().map(|node| (node, 0.0)).collect();

        if n < 3 {
            return centrality;
        }

        let successors: HashMap<NodeIndex, Vec<NodeIndex>> = self
            .graph
            .node_indices()
            .map(|node| {
                let mut next: Vec<NodeIndex> = self
                    .graph
                    .neighbors_directed(node, Direction::Outgoing)
                    .filter(|other| *other != node)
                    .collect();
                next.sort();
                next.dedup();
                (node, next)
            })
            .collect();

        for source in self.graph.node_indices() {
            let mut stack: Vec<NodeIndex> = Vec::new();
            let mut predecessors: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
            let mut sigma: HashMap<NodeIndex, f64> = HashMap::from([(source, 1.0)]);
            let mut distance: HashMap<NodeIndex, usize> = HashMap::from([(source, 0)]);
            let mut queue = VecDeque::from([source]);

            while let Some(v) = queue.pop_front() {
                stack.push(v);
                let dv = distance[&v];
                let sv = sigma[&v];
                for &w in successors.get(&v).map(Vec::as_slice).unwrap_or(&[]) {
                    if !distance.contains_key(&w) {
                        distance.insert(w, dv + 1);
                        queue.push_back(w);
                    }
                    if distance[&w] == dv + 1 {
                        *sigma.entry(w).or_insert(0.0) += sv;
                        predecessors.entry(w).or_default().push(v);
                    }
                }
            }

            let mut delta: HashMap<NodeIndex, f64> = HashMap::new();
            while let Some(w) = stack.pop() {
                let dw = delta.get(&w).copied().unwrap_or(0.0);
                let sw = sigma[&w];
                for &v in predecessors.get(&w).map(Vec::as_slice).unwrap_or(&[]) {
                    *delta.entry(v).or_insert(0.0) += sigma[&v] / sw * (1.0 + dw);
                }
                if w != source {
                    *centrality.entry(w).or_insert(0.0) += dw;
                }
            }
        }

        let scale = 1.0 / ((n - 1) * (n - 2)) as f64;
        for value in centrality.values_mut() {
            *value *= scale;
        }

        centrality
    }

    /// 청크에 엔티티/관계 ID를 채운 사본 반환
    pub fn annotate_chunk(&self, chunk: &DocumentChunk) -> DocumentChunk {
        let mut annotated = chunk.clone();

        let mut entity_ids: Vec<String> = self
            .entities_in_text(&chunk.content, self.entities.keys())
            .into_iter()
            .collect();
        entity_ids.sort();

        let mut relation_ids: Vec<String> = self
            .relations
            .values()
            .filter(|r| r.source_chunk_ids.iter().any(|c| c == &chunk.id))
            .map(|r| r.id.clone())
            .collect();
        relation_ids.sort();

        annotated.entities = entity_ids;
        annotated.relations = relation_ids;
        annotated
    }

    /// 청크 풀에서 그래프 구축
    ///
    /// 1. 청크마다 엔티티 추출 후 병합
    /// 2. 청크에 멘션이 등장하는 엔티티로 관계 추출
    /// 3. 중요도 계산 (추출 실패가 있었으면 빈도 기반)
    pub async fn build_from_chunks(
        &mut self,
        extractor: &dyn EntityExtractor,
        chunks: &[Arc<DocumentChunk>],
    ) -> BuildReport {
        tracing::info!("Building knowledge graph from {} chunks", chunks.len());

        let mut report = BuildReport {
            chunks: chunks.len(),
            ..Default::default()
        };

        for chunk in chunks {
            match extractor.extract_entities(&chunk.content).await {
                Ok(found) => {
                    for candidate in found {
                        self.merge_chunk_entity(&chunk.id, &candidate.name, &candidate.entity_type);
                    }
                }
                Err(e) => {
                    let err = RagError::GraphBuildFailure(format!(
                        "entity extraction failed for chunk {}: {}",
                        chunk.id, e
                    ));
                    tracing::warn!("{}", err);
                    report.errors.push(err);
                }
            }
        }

        let mut ids: Vec<String> = self.entities.keys().cloned().collect();
        ids.sort();

        for chunk in chunks {
            let mut present: Vec<String> = self.entities_in_text(&chunk.content, ids.iter()).into_iter().collect();
            if present.len() < 2 {
                continue;
            }
            present.sort();
            let chunk_entities: Vec<Entity> = present
                .iter()
                .filter_map(|id| self.entities.get(id).cloned())
                .collect();

            match extractor.extract_relations(&chunk.content, &chunk_entities).await {
                Ok(found) => {
                    for candidate in found {
                        self.add_relation(
                            &candidate.subject_id,
                            &candidate.predicate,
                            &candidate.object_id,
                            candidate.confidence,
                            &chunk.id,
                        );
                    }
                }
                Err(e) => {
                    let err = RagError::GraphBuildFailure(format!(
                        "relation extraction failed for chunk {}: {}",
                        chunk.id, e
                    ));
                    tracing::warn!("{}", err);
                    report.errors.push(err);
                }
            }
        }

        self.compute_importance(report.degraded());

        report.entities = self.entities.len();
        report.relations = self.relations.len();

        tracing::info!(
            "Built knowledge graph: {} entities, {} relations ({} extraction failures)",
            report.entities,
            report.relations,
            report.failures()
        );

        report
    }
}

// ============================================================================
// Tests
// ============================================================================
