//! Route cache layer
//!
//! Scores every configured route against an incoming utterance and returns
//! the canned response of the best route above its own threshold, if any.

use std::sync::Arc;

use voxflow_config::{RouteConfig, RouteResponse};
use voxflow_core::UtteranceEncoder;

use crate::vector_cache::{cosine, VectorCache};
use crate::RoutingError;

/// A winning route lookup
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub route_name: String,
    pub response: String,
    pub score: f32,
    /// For per-utterance responses, the utterance the response was paired with
    pub matched_utterance: Option<String>,
}

struct CompiledRoute {
    name: String,
    threshold: f32,
    vectors: Vec<Vec<f32>>,
    response: RouteResponse,
    /// Secondary per-route index; present only for per-utterance responses
    cache: Option<VectorCache>,
}

/// Similarity-scored route cache shared by all turns of a session
pub struct RouteLayer {
    encoder: Arc<dyn UtteranceEncoder>,
    routes: Vec<CompiledRoute>,
}

impl RouteLayer {
    /// Embed every route's utterances; routes keep declaration order, which
    /// also decides score ties (first declared wins).
    pub fn build(
        routes: &[RouteConfig],
        encoder: Arc<dyn UtteranceEncoder>,
    ) -> Result<Self, RoutingError> {
        let mut compiled = Vec::with_capacity(routes.len());

        for route in routes {
            if route.utterances.is_empty() {
                return Err(RoutingError::EmptyRoute(route.route_name.clone()));
            }

            let vectors: Vec<Vec<f32>> = route
                .utterances
                .iter()
                .map(|u| encoder.encode(u))
                .collect();

            let cache = match &route.response {
                RouteResponse::PerUtterance(responses) => {
                    if responses.len() != route.utterances.len() {
                        return Err(RoutingError::Config(format!(
                            "Route '{}': {} responses for {} utterances",
                            route.route_name,
                            responses.len(),
                            route.utterances.len()
                        )));
                    }
                    Some(VectorCache::build(&route.utterances, encoder.as_ref()))
                },
                RouteResponse::Single(_) => None,
            };

            compiled.push(CompiledRoute {
                name: route.route_name.clone(),
                threshold: route.score_threshold,
                vectors,
                response: route.response.clone(),
                cache,
            });
        }

        tracing::info!(routes = compiled.len(), "Route layer built");

        Ok(Self {
            encoder,
            routes: compiled,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Score the utterance against every route. Returns the response of the
    /// highest-scoring route above its threshold, or `None` to fall through
    /// to the reasoning agent.
    ///
    /// Per-utterance responses are resolved against the utterance nearest to
    /// the *query* via the route's secondary index, not the utterance that
    /// produced the route-level score.
    pub fn lookup(&self, utterance: &str) -> Option<RouteMatch> {
        let query = self.encoder.encode(utterance);

        let mut best: Option<(&CompiledRoute, f32)> = None;
        for route in &self.routes {
            let score = route
                .vectors
                .iter()
                .map(|v| cosine(&query, v))
                .fold(0.0, f32::max);

            if score < route.threshold {
                continue;
            }
            // Strictly-greater keeps the first declared route on ties.
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((route, score));
            }
        }

        let (route, score) = best?;

        let (response, matched_utterance) = match &route.response {
            RouteResponse::Single(text) => (text.clone(), None),
            RouteResponse::PerUtterance(responses) => {
                let (idx, nearest, _) = route
                    .cache
                    .as_ref()
                    .expect("per-utterance route always has a cache")
                    .nearest(&query)?;
                (responses[idx].clone(), Some(nearest.to_string()))
            },
        };

        tracing::debug!(
            route = %route.name,
            score = format!("{:.3}", score),
            "Route hit"
        );

        Some(RouteMatch {
            route_name: route.name.clone(),
            response,
            score,
            matched_utterance,
        })
    }
}
