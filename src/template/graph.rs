//! Typed process graph
//!
//! Action types and the guard-labelled edges between them, loaded from the
//! repository once per operation and addressed by [`NodeIndex`].

use super::properties::{
    ActionTypeProperties, EngineProperties, ExecutorProperties, NextActionTypeProperties,
    ProcessFlowProperties, ProcessProperties,
};
use crate::action::models::RequestParameters;
use crate::error::{invalid_parameter, property_server_error, SequencerError, SequencerResult};
use crate::repository::{
    find_visible_entities, Direction, EntityKind, MetadataRepository, Properties, RelationshipKind,
};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction as EdgeDirection;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;
use uuid::Uuid;

// =============================================================================
// GRAPH ELEMENTS
// =============================================================================

/// The engine and request type that run an action type
#[derive(Debug, Clone, PartialEq)]
pub struct Executor {
    pub relationship_guid: Uuid,
    pub engine_guid: Uuid,
    pub engine_name: String,
    pub request_type: String,
    pub request_parameters: RequestParameters,
}

/// Template node
#[derive(Debug, Clone)]
pub struct ActionTypeNode {
    pub guid: Uuid,
    pub properties: ActionTypeProperties,
    /// `None` when the type has no executor relationship
    pub executor: Option<Executor>,
}

impl ActionTypeNode {
    pub fn qualified_name(&self) -> &str {
        &self.properties.qualified_name
    }
}

/// Template edge
#[derive(Debug, Clone, PartialEq)]
pub struct NextActionEdge {
    pub relationship_guid: Uuid,
    pub guard: Option<String>,
    pub mandatory_guard: bool,
}

/// The process a graph was loaded for
#[derive(Debug, Clone)]
pub struct ProcessEntry {
    pub guid: Uuid,
    pub properties: ProcessProperties,
    /// Guard on the process -> first action type flow
    pub guard: Option<String>,
}

/// An edge that fires for a set of completion guards
#[derive(Debug, Clone, Copy)]
pub struct TriggeredEdge<'g> {
    pub target: NodeIndex,
    pub edge: &'g NextActionEdge,
}

/// An edge fires if it has no guard or its guard was produced.
pub fn guard_matches(edge_guard: Option<&str>, output_guards: &[String]) -> bool {
    match edge_guard {
        None => true,
        Some(guard) => output_guards.iter().any(|g| g == guard),
    }
}

// =============================================================================
// PROCESS GRAPH
// =============================================================================

#[derive(Debug, Clone)]
pub struct ProcessGraph {
    graph: DiGraph<ActionTypeNode, NextActionEdge>,
    by_guid: HashMap<Uuid, NodeIndex>,
    root: NodeIndex,
    process: Option<ProcessEntry>,
}

impl ProcessGraph {
    /// Load the graph of a named process, rooted at its first action type.
    pub async fn load_process(
        repository: &dyn MetadataRepository,
        user_id: &str,
        process_name: &str,
        page_size: usize,
    ) -> SequencerResult<Self> {
        let matches = find_visible_entities(
            repository,
            user_id,
            EntityKind::GovernanceActionProcess,
            &qualified_name_match(process_name),
            page_size,
        )
        .await?;

        let process = match matches.as_slice() {
            [] => return Err(SequencerError::UnknownProcess(process_name.to_string())),
            [process] => process,
            _ => {
                return Err(property_server_error(format!(
                    "{} governance action processes are named '{}'",
                    matches.len(),
                    process_name
                )))
            }
        };

        let flows = repository
            .get_relationships(
                user_id,
                process.guid,
                RelationshipKind::GovernanceActionProcessFlow,
                Direction::Outgoing,
            )
            .await?;

        let flow = match flows.as_slice() {
            [] => return Err(SequencerError::NoEntryPoint(process_name.to_string())),
            [flow] => flow,
            _ => {
                return Err(property_server_error(format!(
                    "Governance action process '{}' has {} first action types",
                    process_name,
                    flows.len()
                )))
            }
        };

        let flow_properties: ProcessFlowProperties = flow.decode()?;
        let mut graph = Self::load_from_type(repository, user_id, flow.end2).await?;
        graph.process = Some(ProcessEntry {
            guid: process.guid,
            properties: process.decode()?,
            guard: flow_properties.guard,
        });

        Ok(graph)
    }

    /// Load the graph of a named action type, outside any process.
    pub async fn load_action_type(
        repository: &dyn MetadataRepository,
        user_id: &str,
        action_type_name: &str,
        page_size: usize,
    ) -> SequencerResult<Self> {
        let matches = find_visible_entities(
            repository,
            user_id,
            EntityKind::GovernanceActionType,
            &qualified_name_match(action_type_name),
            page_size,
        )
        .await?;

        match matches.as_slice() {
            [] => Err(invalid_parameter(format!(
                "Unknown governance action type '{}'",
                action_type_name
            ))),
            [action_type] => Self::load_from_type(repository, user_id, action_type.guid).await,
            _ => Err(property_server_error(format!(
                "{} governance action types are named '{}'",
                matches.len(),
                action_type_name
            ))),
        }
    }

    /// Load every action type reachable from `root_guid`, plus the direct
    /// predecessors of each so incoming edges are complete.
    pub async fn load_from_type(
        repository: &dyn MetadataRepository,
        user_id: &str,
        root_guid: Uuid,
    ) -> SequencerResult<Self> {
        let mut graph = DiGraph::new();
        let mut by_guid = HashMap::new();
        let mut seen_edges = HashSet::new();
        let mut expanded = HashSet::new();
        let mut queue = VecDeque::new();

        let root = add_node(repository, user_id, &mut graph, &mut by_guid, root_guid).await?;
        queue.push_back(root_guid);

        while let Some(type_guid) = queue.pop_front() {
            if !expanded.insert(type_guid) {
                continue;
            }

            let relationships = repository
                .get_relationships(
                    user_id,
                    type_guid,
                    RelationshipKind::NextGovernanceActionType,
                    Direction::Either,
                )
                .await?;

            for relationship in relationships {
                if !seen_edges.insert(relationship.guid) {
                    continue;
                }

                let from = add_node(repository, user_id, &mut graph, &mut by_guid, relationship.end1).await?;
                let to = add_node(repository, user_id, &mut graph, &mut by_guid, relationship.end2).await?;
                let properties: NextActionTypeProperties = relationship.decode()?;

                graph.add_edge(
                    from,
                    to,
                    NextActionEdge {
                        relationship_guid: relationship.guid,
                        guard: properties.guard,
                        mandatory_guard: properties.mandatory_guard,
                    },
                );

                if relationship.end1 == type_guid {
                    queue.push_back(relationship.end2);
                }
            }
        }

        debug!(
            "Loaded process graph from {} with {} action types and {} edges",
            root_guid,
            graph.node_count(),
            graph.edge_count()
        );

        Ok(Self {
            graph,
            by_guid,
            root,
            process: None,
        })
    }

    // ── Accessors ──

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn process(&self) -> Option<&ProcessEntry> {
        self.process.as_ref()
    }

    pub fn node(&self, index: NodeIndex) -> &ActionTypeNode {
        &self.graph[index]
    }

    pub fn index_of(&self, type_guid: Uuid) -> Option<NodeIndex> {
        self.by_guid.get(&type_guid).copied()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    // ── Guard semantics ──

    /// Guards of every mandatory incoming edge, deduplicated in edge order.
    pub fn mandatory_guards(&self, index: NodeIndex) -> Vec<String> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, EdgeDirection::Incoming)
            .filter(|e| e.weight().mandatory_guard)
            .collect();
        edges.sort_by_key(|e| e.id());

        let mut guards: Vec<String> = Vec::new();
        for edge in edges {
            if let Some(guard) = &edge.weight().guard {
                if !guards.contains(guard) {
                    guards.push(guard.clone());
                }
            }
        }
        guards
    }

    /// Outgoing edges that fire for `output_guards`, ordered by the target's
    /// qualified name.
    pub fn triggered_edges(&self, index: NodeIndex, output_guards: &[String]) -> Vec<TriggeredEdge<'_>> {
        let mut triggered: Vec<(EdgeIndex, TriggeredEdge<'_>)> = self
            .graph
            .edges_directed(index, EdgeDirection::Outgoing)
            .filter(|e| guard_matches(e.weight().guard.as_deref(), output_guards))
            .map(|e| {
                (
                    e.id(),
                    TriggeredEdge {
                        target: e.target(),
                        edge: e.weight(),
                    },
                )
            })
            .collect();

        triggered.sort_by(|(a_id, a), (b_id, b)| {
            self.graph[a.target]
                .qualified_name()
                .cmp(self.graph[b.target].qualified_name())
                .then(a_id.cmp(b_id))
        });
        triggered.into_iter().map(|(_, t)| t).collect()
    }
}

pub(crate) fn qualified_name_match(name: &str) -> Properties {
    let mut properties = Properties::new();
    properties.insert("qualifiedName".to_string(), json!(name));
    properties
}

async fn add_node(
    repository: &dyn MetadataRepository,
    user_id: &str,
    graph: &mut DiGraph<ActionTypeNode, NextActionEdge>,
    by_guid: &mut HashMap<Uuid, NodeIndex>,
    type_guid: Uuid,
) -> SequencerResult<NodeIndex> {
    if let Some(index) = by_guid.get(&type_guid) {
        return Ok(*index);
    }

    let entity = repository
        .get_entity(user_id, type_guid, EntityKind::GovernanceActionType)
        .await?;
    let properties: ActionTypeProperties = entity.decode()?;
    let executor = load_executor(repository, user_id, type_guid, &properties.qualified_name).await?;

    let index = graph.add_node(ActionTypeNode {
        guid: type_guid,
        properties,
        executor,
    });
    by_guid.insert(type_guid, index);
    Ok(index)
}

async fn load_executor(
    repository: &dyn MetadataRepository,
    user_id: &str,
    type_guid: Uuid,
    type_name: &str,
) -> SequencerResult<Option<Executor>> {
    let relationships = repository
        .get_relationships(
            user_id,
            type_guid,
            RelationshipKind::GovernanceActionTypeExecutor,
            Direction::Outgoing,
        )
        .await?;

    let relationship = match relationships.as_slice() {
        [] => return Ok(None),
        [relationship] => relationship,
        _ => {
            return Err(property_server_error(format!(
                "Governance action type '{}' has {} executors",
                type_name,
                relationships.len()
            )))
        }
    };

    let properties: ExecutorProperties = relationship.decode()?;
    let engine: EngineProperties = repository
        .get_entity(user_id, relationship.end2, EntityKind::GovernanceEngine)
        .await?
        .decode()?;

    Ok(Some(Executor {
        relationship_guid: relationship.guid,
        engine_guid: relationship.end2,
        engine_name: engine.qualified_name,
        request_type: properties.request_type,
        request_parameters: properties.request_parameters,
    }))
}
