use crate::application::session::SessionProvider;
use crate::infrastructure::error::InfraError;
use std::collections::BTreeMap;
use url::form_urlencoded;

pub const LOGIN_ROUTE: &str = "login";
pub const DEFAULT_LANDING_ROUTE: &str = "home";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteMeta {
    pub requires_auth: bool,
    pub requires_no_auth: bool,
}

impl RouteMeta {
    pub const PUBLIC: RouteMeta = RouteMeta {
        requires_auth: false,
        requires_no_auth: false,
    };
    pub const AUTH: RouteMeta = RouteMeta {
        requires_auth: true,
        requires_no_auth: false,
    };
    pub const GUEST: RouteMeta = RouteMeta {
        requires_auth: false,
        requires_no_auth: true,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub name: &'static str,
    pub path: &'static str,
    pub meta: RouteMeta,
}

impl RouteRecord {
    pub const fn new(name: &'static str, path: &'static str, meta: RouteMeta) -> Self {
        Self { name, path, meta }
    }

    fn match_path(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let pattern: Vec<&str> = split_segments(self.path).collect();
        let actual: Vec<&str> = split_segments(path).collect();
        if pattern.len() != actual.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (expected, segment) in pattern.iter().zip(actual) {
            if let Some(name) = expected.strip_prefix(':') {
                params.insert(name.to_string(), segment.to_string());
            } else if *expected != segment {
                return None;
            }
        }
        Some(params)
    }

    fn has_params(&self) -> bool {
        split_segments(self.path).any(|segment| segment.starts_with(':'))
    }
}

pub fn default_routes() -> Vec<RouteRecord> {
    vec![
        RouteRecord::new("home", "/", RouteMeta::PUBLIC),
        RouteRecord::new(LOGIN_ROUTE, "/login", RouteMeta::GUEST),
        RouteRecord::new("forgot-password", "/forgot-password", RouteMeta::GUEST),
        RouteRecord::new("todos", "/todos", RouteMeta::AUTH),
        RouteRecord::new("next", "/next", RouteMeta::AUTH),
        RouteRecord::new("someday", "/someday", RouteMeta::AUTH),
        RouteRecord::new("daily-view", "/daily/:id", RouteMeta::AUTH),
        RouteRecord::new("settings", "/settings", RouteMeta::AUTH),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub name: &'static str,
    pub full_path: String,
    pub params: BTreeMap<String, String>,
    pub meta: RouteMeta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub name: String,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl RedirectTarget {
    pub fn to_location(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        format!("{}?{query}", self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    Proceed(ResolvedRoute),
    Redirect(RedirectTarget),
    NotFound,
}

#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<RouteRecord>,
    landing_route: String,
}

impl Default for Router {
    fn default() -> Self {
        Self {
            routes: default_routes(),
            landing_route: DEFAULT_LANDING_ROUTE.to_string(),
        }
    }
}

impl Router {
    pub fn new(routes: Vec<RouteRecord>) -> Self {
        Self {
            routes,
            landing_route: DEFAULT_LANDING_ROUTE.to_string(),
        }
    }

    /// The landing route must exist and take no path parameters.
    pub fn with_landing_route(mut self, name: &str) -> Result<Self, InfraError> {
        let record = self.record(name).ok_or_else(|| {
            InfraError::InvalidConfig(format!("unknown landing route '{name}'"))
        })?;
        if record.has_params() || record.meta.requires_no_auth {
            return Err(InfraError::InvalidConfig(format!(
                "route '{name}' cannot be used as landing route"
            )));
        }
        self.landing_route = name.to_string();
        Ok(self)
    }

    pub fn routes(&self) -> &[RouteRecord] {
        &self.routes
    }

    pub fn landing_route(&self) -> &str {
        &self.landing_route
    }

    pub fn resolve(&self, full_path: &str) -> Option<ResolvedRoute> {
        let path = path_only(full_path);
        self.routes.iter().find_map(|record| {
            record.match_path(path).map(|params| ResolvedRoute {
                name: record.name,
                full_path: full_path.to_string(),
                params,
                meta: record.meta,
            })
        })
    }

    /// Pre-navigation check for `full_path` (path plus optional query and hash).
    pub fn decide(&self, full_path: &str, authenticated: bool) -> NavigationDecision {
        let Some(route) = self.resolve(full_path) else {
            return NavigationDecision::NotFound;
        };

        if route.meta.requires_auth && !authenticated {
            return NavigationDecision::Redirect(RedirectTarget {
                name: LOGIN_ROUTE.to_string(),
                path: self.static_path(LOGIN_ROUTE),
                query: vec![("redirect".to_string(), route.full_path)],
            });
        }
        if route.meta.requires_no_auth && authenticated {
            return NavigationDecision::Redirect(RedirectTarget {
                name: self.landing_route.clone(),
                path: self.static_path(&self.landing_route),
                query: Vec::new(),
            });
        }
        NavigationDecision::Proceed(route)
    }

    pub fn guard(&self, full_path: &str, session: &dyn SessionProvider) -> NavigationDecision {
        self.decide(full_path, session.current_user().is_some())
    }

    fn record(&self, name: &str) -> Option<&RouteRecord> {
        self.routes.iter().find(|record| record.name == name)
    }

    fn static_path(&self, name: &str) -> String {
        self.record(name)
            .map(|record| record.path.to_string())
            .unwrap_or_else(|| "/".to_string())
    }
}

fn path_only(full_path: &str) -> &str {
    let end = full_path.find(['?', '#']).unwrap_or(full_path.len());
    &full_path[..end]
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}
