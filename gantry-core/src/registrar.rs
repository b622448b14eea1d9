//! Declarative route registration.
//!
//! Applications describe their surface as a tree of [`HandlerGroup`]s:
//! each group mounts a URL segment, names the middleware wrapping its
//! subtree, optionally carries a rate-limit spec and documentation
//! metadata, and lists its terminal routes and child groups. The
//! [`Registrar`] walks the tree once at startup, composing paths and
//! middleware along the nesting path, injecting dependencies from the
//! container, and collecting route descriptors for documentation.

use crate::container::Container;
use crate::error::Error;
use crate::http::HttpMethod;
use crate::middleware::{self, Handler, Middleware, MiddlewareRegistry, RateLimit};
use crate::router::{join_paths, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Documentation metadata attached to a group.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiMeta {
    pub group: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub tags: &'static [&'static str],
}

/// How a group mounts into the route tree.
pub struct GroupSpec {
    /// URL segment, e.g. `/users`. Required to participate in routing.
    pub url: &'static str,
    /// Middleware names resolved against the registry, then built-ins.
    pub middleware: &'static [&'static str],
    /// Optional `N/sec|min|hour` rate-limit spec for the subtree.
    pub rate_limit: Option<&'static str>,
    /// Optional documentation metadata inherited by the group's routes.
    pub api: Option<ApiMeta>,
}

impl GroupSpec {
    pub fn at(url: &'static str) -> Self {
        Self {
            url,
            middleware: &[],
            rate_limit: None,
            api: None,
        }
    }

    pub fn with_middleware(mut self, names: &'static [&'static str]) -> Self {
        self.middleware = names;
        self
    }

    pub fn with_rate_limit(mut self, spec: &'static str) -> Self {
        self.rate_limit = Some(spec);
        self
    }

    pub fn with_api(mut self, api: ApiMeta) -> Self {
        self.api = Some(api);
        self
    }
}

/// A terminal route within a group.
pub struct RouteSpec {
    pub method: HttpMethod,
    /// Sub-path under the group; empty registers at the group path.
    pub path: String,
    /// Handler name used for documentation.
    pub name: String,
    pub handler: Handler,
}

impl RouteSpec {
    /// Register at the group path under an explicit verb.
    pub fn verb(method: HttpMethod, handler: Handler) -> Self {
        Self {
            method,
            path: String::new(),
            name: method.as_str().to_lowercase(),
            handler,
        }
    }

    /// Register a named action as a POST sub-route at the kebab-cased
    /// name, e.g. `Profile` → `POST <group>/profile`.
    pub fn action(name: &str, handler: Handler) -> Self {
        Self {
            method: HttpMethod::POST,
            path: kebab_case(name),
            name: name.to_string(),
            handler,
        }
    }

    /// Register a named sub-route whose verb is inferred from the name
    /// prefix (`Get*`/`List*` → GET, `Create*`/`Add*` → POST,
    /// `Update*`/`Edit*` → PUT, `Delete*`/`Remove*` → DELETE,
    /// `Patch*` → PATCH, otherwise POST), mounted at the kebab-cased
    /// name.
    pub fn auto(name: &str, handler: Handler) -> Self {
        Self {
            method: verb_hint(name),
            path: kebab_case(name),
            name: name.to_string(),
            handler,
        }
    }
}

/// A node in the user's handler tree.
pub trait HandlerGroup: Send + Sync {
    /// Mount point and inherited configuration for this group.
    fn mount(&self) -> GroupSpec;

    /// Terminal routes registered at (or under) the group path.
    fn routes(&self) -> Vec<RouteSpec> {
        Vec::new()
    }

    /// Child groups; the walk recurses into each.
    fn children(&self) -> Vec<Arc<dyn HandlerGroup>> {
        Vec::new()
    }

    /// WebSocket terminal. When present it is registered as a GET route
    /// at the group path and the walk does not descend further.
    fn socket(&self) -> Option<Handler> {
        None
    }

    /// Populate injected dependencies from the container. Absent
    /// providers should be logged and left unset, not panicked on.
    fn inject(&self, _container: &Container) {}
}

/// One registered terminal, as reported to documentation providers.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDescriptor {
    pub method: &'static str,
    pub pattern: String,
    pub handler: String,
    pub group: String,
    pub version: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Consumer of the collected route descriptors, invoked once at startup
/// finalisation.
pub trait DocProvider: Send + Sync {
    fn publish(&self, routes: &[RouteDescriptor]);
}

/// Walks a handler tree, registering every reachable terminal.
pub struct Registrar<'a> {
    router: &'a Router,
    container: &'a Container,
    descriptors: Vec<RouteDescriptor>,
}

impl<'a> Registrar<'a> {
    pub fn new(router: &'a Router, container: &'a Container) -> Self {
        Self {
            router,
            container,
            descriptors: Vec::new(),
        }
    }

    /// Register the whole tree rooted at `root`. Running this twice over
    /// the same tree yields the same route table: terminals are replaced,
    /// not duplicated, and the descriptor set is rebuilt per run.
    pub fn register(&mut self, root: &dyn HandlerGroup) -> Result<(), Error> {
        self.descriptors.clear();
        self.walk(root, "", &[])
    }

    /// Descriptors collected by the last [`Registrar::register`] run.
    pub fn descriptors(&self) -> &[RouteDescriptor] {
        &self.descriptors
    }

    pub fn into_descriptors(self) -> Vec<RouteDescriptor> {
        self.descriptors
    }

    fn walk(
        &mut self,
        group: &dyn HandlerGroup,
        prefix: &str,
        inherited: &[Arc<dyn Middleware>],
    ) -> Result<(), Error> {
        let spec = group.mount();
        let path = join_paths(prefix, spec.url);

        group.inject(self.container);

        let registry = self.container.get::<MiddlewareRegistry>();
        let mut chain = inherited.to_vec();
        for name in spec.middleware {
            let resolved = registry
                .as_ref()
                .and_then(|r| r.get(name))
                .or_else(|| middleware::builtin(name, self.router.development()));
            match resolved {
                Some(mw) => chain.push(mw),
                None => warn!(middleware = name, path = %path, "unknown middleware name, skipping"),
            }
        }
        if let Some(limit) = spec.rate_limit {
            chain.push(Arc::new(RateLimit::from_spec(limit)?));
        }

        if let Some(ws) = group.socket() {
            self.router
                .register(HttpMethod::GET, &path, chain.clone(), ws);
            self.describe(HttpMethod::GET, &path, "connection", spec.api.as_ref());
            debug!(path = %path, "websocket terminal registered");
            return Ok(());
        }

        for route in group.routes() {
            let full = if route.path.is_empty() {
                path.clone()
            } else {
                join_paths(&path, &route.path)
            };
            self.router
                .register(route.method, &full, chain.clone(), route.handler.clone());
            self.describe(route.method, &full, &route.name, spec.api.as_ref());
        }

        for child in group.children() {
            self.walk(child.as_ref(), &path, &chain)?;
        }

        Ok(())
    }

    fn describe(
        &mut self,
        method: HttpMethod,
        pattern: &str,
        handler: &str,
        api: Option<&ApiMeta>,
    ) {
        let api = api.copied().unwrap_or_default();
        self.descriptors.push(RouteDescriptor {
            method: method.as_str(),
            pattern: pattern.to_string(),
            handler: handler.to_string(),
            group: api.group.to_string(),
            version: api.version.to_string(),
            description: if api.description.is_empty() {
                describe_name(handler)
            } else {
                api.description.to_string()
            },
            tags: api.tags.iter().map(|t| t.to_string()).collect(),
        });
    }
}

/// Kebab-case a handler name: `GetUserProfile` → `get-user-profile`.
pub fn kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Infer an HTTP verb from a handler name prefix.
pub fn verb_hint(name: &str) -> HttpMethod {
    let lowered = name.to_ascii_lowercase();
    if lowered.starts_with("get") || lowered.starts_with("list") {
        HttpMethod::GET
    } else if lowered.starts_with("create") || lowered.starts_with("add") {
        HttpMethod::POST
    } else if lowered.starts_with("update") || lowered.starts_with("edit") {
        HttpMethod::PUT
    } else if lowered.starts_with("delete") || lowered.starts_with("remove") {
        HttpMethod::DELETE
    } else if lowered.starts_with("patch") {
        HttpMethod::PATCH
    } else {
        HttpMethod::POST
    }
}

// "GetProfile" → "Get profile", for descriptor defaults.
fn describe_name(name: &str) -> String {
    let words: Vec<String> = kebab_case(name)
        .split('-')
        .map(|w| w.to_string())
        .collect();
    if words.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        if i == 0 {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(chars.as_str());
            }
        } else {
            out.push(' ');
            out.push_str(word);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::middleware::{handler, HandlerFuture};

    fn noop(_ctx: &mut Context) -> HandlerFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    struct Users;

    impl HandlerGroup for Users {
        fn mount(&self) -> GroupSpec {
            GroupSpec::at("/users/:id").with_api(ApiMeta {
                group: "users",
                version: "v1",
                description: "",
                tags: &["users"],
            })
        }

        fn routes(&self) -> Vec<RouteSpec> {
            vec![
                RouteSpec::verb(HttpMethod::GET, handler(noop)),
                RouteSpec::action("Profile", handler(noop)),
                RouteSpec::auto("ListFriends", handler(noop)),
            ]
        }
    }

    struct Rooted;

    impl HandlerGroup for Rooted {
        fn mount(&self) -> GroupSpec {
            GroupSpec::at("/")
        }

        fn routes(&self) -> Vec<RouteSpec> {
            vec![RouteSpec::verb(HttpMethod::GET, handler(noop))]
        }

        fn children(&self) -> Vec<Arc<dyn HandlerGroup>> {
            vec![Arc::new(Users)]
        }
    }

    fn registered(router: &Router) -> Vec<(String, String)> {
        let mut routes: Vec<(String, String)> = router
            .routes()
            .into_iter()
            .map(|r| (r.method.to_string(), r.path))
            .collect();
        routes.sort();
        routes
    }

    #[test]
    fn test_walk_composes_paths() {
        let router = Router::new();
        let container = Container::new();
        let mut registrar = Registrar::new(&router, &container);
        registrar.register(&Rooted).unwrap();

        assert_eq!(
            registered(&router),
            vec![
                ("GET".into(), "/".into()),
                ("GET".into(), "/users/:id".into()),
                ("GET".into(), "/users/:id/list-friends".into()),
                ("POST".into(), "/users/:id/profile".into()),
            ]
        );
    }

    #[test]
    fn test_register_twice_is_idempotent() {
        let router = Router::new();
        let container = Container::new();
        let mut registrar = Registrar::new(&router, &container);
        registrar.register(&Rooted).unwrap();
        let first = registered(&router);
        let first_descriptors = registrar.descriptors().len();

        registrar.register(&Rooted).unwrap();
        assert_eq!(registered(&router), first);
        assert_eq!(registrar.descriptors().len(), first_descriptors);
    }

    #[test]
    fn test_descriptors_carry_api_meta() {
        let router = Router::new();
        let container = Container::new();
        let mut registrar = Registrar::new(&router, &container);
        registrar.register(&Rooted).unwrap();

        let profile = registrar
            .descriptors()
            .iter()
            .find(|d| d.handler == "Profile")
            .unwrap();
        assert_eq!(profile.method, "POST");
        assert_eq!(profile.group, "users");
        assert_eq!(profile.version, "v1");
        assert_eq!(profile.tags, vec!["users".to_string()]);
        assert_eq!(profile.description, "Profile");
    }

    struct Socketed;

    impl HandlerGroup for Socketed {
        fn mount(&self) -> GroupSpec {
            GroupSpec::at("/ws")
        }

        fn socket(&self) -> Option<Handler> {
            Some(handler(noop))
        }

        fn children(&self) -> Vec<Arc<dyn HandlerGroup>> {
            // Must never be visited: the socket terminal stops the walk.
            vec![Arc::new(Users)]
        }
    }

    #[test]
    fn test_socket_terminal_stops_recursion() {
        let router = Router::new();
        let container = Container::new();
        let mut registrar = Registrar::new(&router, &container);
        registrar.register(&Socketed).unwrap();

        assert_eq!(registered(&router), vec![("GET".into(), "/ws".into())]);
    }

    struct Limited;

    impl HandlerGroup for Limited {
        fn mount(&self) -> GroupSpec {
            GroupSpec::at("/limited").with_rate_limit("not-a-spec")
        }

        fn routes(&self) -> Vec<RouteSpec> {
            vec![RouteSpec::verb(HttpMethod::GET, handler(noop))]
        }
    }

    #[test]
    fn test_bad_rate_limit_fails_registration() {
        let router = Router::new();
        let container = Container::new();
        let mut registrar = Registrar::new(&router, &container);
        let err = registrar.register(&Limited).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_kebab_case() {
        assert_eq!(kebab_case("Profile"), "profile");
        assert_eq!(kebab_case("GetUserProfile"), "get-user-profile");
        assert_eq!(kebab_case("ListFriends"), "list-friends");
    }

    #[test]
    fn test_verb_hint() {
        assert_eq!(verb_hint("GetProfile"), HttpMethod::GET);
        assert_eq!(verb_hint("ListUsers"), HttpMethod::GET);
        assert_eq!(verb_hint("CreateUser"), HttpMethod::POST);
        assert_eq!(verb_hint("AddTag"), HttpMethod::POST);
        assert_eq!(verb_hint("UpdateUser"), HttpMethod::PUT);
        assert_eq!(verb_hint("EditNote"), HttpMethod::PUT);
        assert_eq!(verb_hint("DeleteUser"), HttpMethod::DELETE);
        assert_eq!(verb_hint("RemoveTag"), HttpMethod::DELETE);
        assert_eq!(verb_hint("PatchUser"), HttpMethod::PATCH);
        assert_eq!(verb_hint("Profile"), HttpMethod::POST);
    }
}
