//! Networking path resolution (OCPP 2.1)
//!
//! A networking node knows its directly connected neighbours (`links`) and,
//! for stations further away, which node each one is reached through
//! (`routes`). Resolving a destination yields the neighbour link to write
//! to plus the ordered hop list to embed for multi-hop delivery.
//!
//! ```text
//!   local ──link──► LC01 ──► NN07 ──► CS042
//!   path = [LC01, NN07, CS042]   (last hop == destination)
//! ```

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::error::CallFailure;
use crate::types::NetworkIdentity;

/// Default hop limit for resolved paths
pub const DEFAULT_MAX_HOPS: usize = 8;

/// Ordered hop identities; empty means direct delivery
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NetworkPath {
    hops: Vec<NetworkIdentity>,
}

impl NetworkPath {
    pub fn direct() -> Self {
        Self::default()
    }

    /// # Panics
    /// If the last hop is not `destination`.
    pub fn new(hops: Vec<NetworkIdentity>, destination: &NetworkIdentity) -> Self {
        assert!(
            hops.last().map_or(true, |last| last == destination),
            "network path must end at its destination"
        );
        Self { hops }
    }

    pub fn is_direct(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn hops(&self) -> &[NetworkIdentity] {
        &self.hops
    }

    /// Neighbour the frame is written to
    pub fn next_hop(&self) -> Option<&NetworkIdentity> {
        self.hops.first()
    }

    pub fn final_hop(&self) -> Option<&NetworkIdentity> {
        self.hops.last()
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }
}

impl fmt::Display for NetworkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hops.is_empty() {
            return f.write_str("direct");
        }
        for (i, hop) in self.hops.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{hop}")?;
        }
        Ok(())
    }
}

/// Why a destination could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no route to {0}")]
    NoRoute(NetworkIdentity),

    #[error("route to {destination} loops through {hop}")]
    Loop {
        destination: NetworkIdentity,
        hop: NetworkIdentity,
    },

    #[error("route to {destination} exceeds {max} hops")]
    TooManyHops {
        destination: NetworkIdentity,
        max: usize,
    },
}

impl RouteError {
    pub fn destination(&self) -> &NetworkIdentity {
        match self {
            RouteError::NoRoute(destination)
            | RouteError::Loop { destination, .. }
            | RouteError::TooManyHops { destination, .. } => destination,
        }
    }
}

impl From<RouteError> for CallFailure {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::NoRoute(destination)
            | RouteError::Loop { destination, .. }
            | RouteError::TooManyHops { destination, .. } => CallFailure::Unreachable(destination),
        }
    }
}

/// A resolved destination: where to write and what path to embed
#[derive(Debug, Clone)]
pub struct Route<L> {
    pub link: L,
    pub destination: NetworkIdentity,
    pub path: NetworkPath,
}

/// Maps logical identities to physical links
#[derive(Debug, Clone)]
pub struct NetworkPathResolver<L> {
    links: HashMap<NetworkIdentity, L>,
    /// destination -> node one step closer to us
    routes: HashMap<NetworkIdentity, NetworkIdentity>,
    max_hops: usize,
}

impl<L> Default for NetworkPathResolver<L> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HOPS)
    }
}

impl<L> NetworkPathResolver<L> {
    pub fn new(max_hops: usize) -> Self {
        Self {
            links: HashMap::new(),
            routes: HashMap::new(),
            max_hops: max_hops.max(1),
        }
    }

    /// Register a directly connected neighbour
    pub fn add_link(&mut self, identity: NetworkIdentity, link: L) -> Option<L> {
        debug!(identity = %identity, "Link up");
        self.links.insert(identity, link)
    }

    pub fn remove_link(&mut self, identity: &NetworkIdentity) -> Option<L> {
        debug!(identity = %identity, "Link down");
        self.links.remove(identity)
    }

    /// `destination` is reached through `via`
    pub fn add_route(&mut self, destination: NetworkIdentity, via: NetworkIdentity) {
        self.routes.insert(destination, via);
    }

    pub fn remove_route(&mut self, destination: &NetworkIdentity) -> Option<NetworkIdentity> {
        self.routes.remove(destination)
    }

    pub fn is_linked(&self, identity: &NetworkIdentity) -> bool {
        self.links.contains_key(identity)
    }
}

impl<L: Clone> NetworkPathResolver<L> {
    pub fn resolve(&self, destination: &NetworkIdentity) -> Result<Route<L>, RouteError> {
        if let Some(link) = self.links.get(destination) {
            return Ok(Route {
                link: link.clone(),
                destination: destination.clone(),
                path: NetworkPath::direct(),
            });
        }

        // Walk back from the destination until a directly linked node
        let mut chain = vec![destination.clone()];
        let mut current = destination;
        let link = loop {
            let via = self
                .routes
                .get(current)
                .ok_or_else(|| RouteError::NoRoute(destination.clone()))?;
            if chain.contains(via) {
                return Err(RouteError::Loop {
                    destination: destination.clone(),
                    hop: via.clone(),
                });
            }
            chain.push(via.clone());
            if chain.len() > self.max_hops {
                return Err(RouteError::TooManyHops {
                    destination: destination.clone(),
                    max: self.max_hops,
                });
            }
            if let Some(link) = self.links.get(via) {
                break link.clone();
            }
            current = via;
        };

        chain.reverse();
        let path = NetworkPath::new(chain, destination);
        debug!(destination = %destination, path = %path, "Resolved route");
        Ok(Route {
            link,
            destination: destination.clone(),
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NetworkIdentity {
        NetworkIdentity::new(s).unwrap()
    }

    #[test]
    fn test_direct_link() {
        let mut resolver = NetworkPathResolver::default();
        resolver.add_link(id("CS001"), 1u32);
        let route = resolver.resolve(&id("CS001")).unwrap();
        assert_eq!(route.link, 1);
        assert!(route.path.is_direct());
        assert_eq!(route.path.to_string(), "direct");
    }

    #[test]
    fn test_multi_hop_path_ends_at_destination() {
        let mut resolver = NetworkPathResolver::default();
        resolver.add_link(id("LC01"), "lc-socket");
        resolver.add_route(id("NN07"), id("LC01"));
        resolver.add_route(id("CS042"), id("NN07"));

        let route = resolver.resolve(&id("CS042")).unwrap();
        assert_eq!(route.link, "lc-socket");
        assert_eq!(route.path.hops(), &[id("LC01"), id("NN07"), id("CS042")]);
        assert_eq!(route.path.next_hop(), Some(&id("LC01")));
        assert_eq!(route.path.final_hop(), Some(&id("CS042")));
    }

    #[test]
    fn test_unreachable() {
        let mut resolver: NetworkPathResolver<u32> = NetworkPathResolver::default();
        assert_eq!(
            resolver.resolve(&id("CS9")).unwrap_err(),
            RouteError::NoRoute(id("CS9"))
        );

        // Route via a node that is not linked and has no onward route
        resolver.add_route(id("CS9"), id("NN1"));
        let err = resolver.resolve(&id("CS9")).unwrap_err();
        assert_eq!(err.destination(), &id("CS9"));

        let failure: CallFailure = err.into();
        assert!(matches!(failure, CallFailure::Unreachable(ref d) if d == &id("CS9")));
        assert!(failure.is_unanswered());
    }

    #[test]
    fn test_loop_detection() {
        let mut resolver: NetworkPathResolver<u32> = NetworkPathResolver::default();
        resolver.add_route(id("A"), id("B"));
        resolver.add_route(id("B"), id("A"));
        assert!(matches!(
            resolver.resolve(&id("A")),
            Err(RouteError::Loop { .. })
        ));
    }

    #[test]
    fn test_hop_limit() {
        let mut resolver = NetworkPathResolver::new(2);
        resolver.add_link(id("N0"), 0u8);
        resolver.add_route(id("N1"), id("N0"));
        resolver.add_route(id("N2"), id("N1"));
        assert!(resolver.resolve(&id("N1")).is_ok());
        assert!(matches!(
            resolver.resolve(&id("N2")),
            Err(RouteError::TooManyHops { max: 2, .. })
        ));
    }

    #[test]
    fn test_link_removal() {
        let mut resolver = NetworkPathResolver::default();
        resolver.add_link(id("LC01"), 7u16);
        resolver.add_route(id("CS1"), id("LC01"));
        assert!(resolver.resolve(&id("CS1")).is_ok());
        resolver.remove_link(&id("LC01"));
        assert!(resolver.resolve(&id("CS1")).is_err());
    }

    #[test]
    #[should_panic(expected = "destination")]
    fn test_path_must_end_at_destination() {
        NetworkPath::new(vec![id("LC01")], &id("CS1"));
    }
}
