//! RPC API modules and exposed-module filtering.
//!
//! An [`ApiModule`] is a method namespace (`cfx`, `eth`, `txpool`, ...) with a
//! table of handlers. Modules are either public, exposed by default, or
//! private, exposed only when named explicitly in the server configuration.

use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    future::Future,
    sync::Arc,
};

use async_trait::async_trait;
use gateway_node::{
    ClientProvider,
    Group,
    UpstreamClient,
};
use serde_json::Value;

use crate::{
    context::CallContext,
    error::{
        AssemblyError,
        GatewayError,
    },
};

/// Handles one RPC method.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn call(&self, ctx: &CallContext, params: Value) -> Result<Value, GatewayError>;
}

#[async_trait]
impl<F, Fut> MethodHandler for F
where
    F: Fn(CallContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, GatewayError>> + Send + 'static,
{
    async fn call(&self, ctx: &CallContext, params: Value) -> Result<Value, GatewayError> {
        self(ctx.clone(), params).await
    }
}

pub type SharedHandler = Arc<dyn MethodHandler>;

/// A namespace of RPC methods.
#[derive(Clone)]
pub struct ApiModule {
    namespace: &'static str,
    public: bool,
    methods: BTreeMap<String, SharedHandler>,
}

impl std::fmt::Debug for ApiModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiModule")
            .field("namespace", &self.namespace)
            .field("public", &self.public)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ApiModule {
    pub fn new(namespace: &'static str, public: bool) -> Self {
        Self {
            namespace,
            public,
            methods: BTreeMap::new(),
        }
    }

    pub fn public(namespace: &'static str) -> Self {
        Self::new(namespace, true)
    }

    pub fn private(namespace: &'static str) -> Self {
        Self::new(namespace, false)
    }

    /// Registers `handler` under the full method name, e.g. `cfx_epochNumber`.
    pub fn method(mut self, name: impl Into<String>, handler: impl MethodHandler + 'static) -> Self {
        self.methods.insert(name.into(), Arc::new(handler));
        self
    }

    /// Registers methods forwarded unchanged to the upstream of `group`, or of
    /// the provider default group when `group` is `None`.
    pub fn forward<C: UpstreamClient>(
        mut self,
        provider: &Arc<ClientProvider<C>>,
        group: Option<Group>,
        methods: &[&str],
    ) -> Self {
        for method in methods {
            let handler = Forward::new(Arc::clone(provider), *method).with_group(group.clone());
            self.methods.insert(method.to_string(), Arc::new(handler));
        }
        self
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn handler(&self, method: &str) -> Option<&SharedHandler> {
        self.methods.get(method)
    }

    pub fn into_methods(self) -> BTreeMap<String, SharedHandler> {
        self.methods
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Forwards a call to the upstream node picked for the caller identity.
pub struct Forward<C> {
    provider: Arc<ClientProvider<C>>,
    group: Option<Group>,
    method: String,
}

impl<C: UpstreamClient> Forward<C> {
    pub fn new(provider: Arc<ClientProvider<C>>, method: impl Into<String>) -> Self {
        Self {
            provider,
            group: None,
            method: method.into(),
        }
    }

    pub fn with_group(mut self, group: Option<Group>) -> Self {
        self.group = group;
        self
    }
}

#[async_trait]
impl<C: UpstreamClient> MethodHandler for Forward<C> {
    async fn call(&self, ctx: &CallContext, params: Value) -> Result<Value, GatewayError> {
        let identity = ctx.identity.as_deref();
        let client = match &self.group {
            Some(group) => self.provider.get_client_by_ip_group(identity, group).await?,
            None => self.provider.get_client_by_ip(identity).await?,
        };
        Ok(client.rpc().call(&self.method, params).await?)
    }
}

/// Selects the modules a server exposes.
///
/// An empty `exposed` list keeps every public module. Otherwise exactly the
/// listed modules are kept, private ones included, and naming an unknown
/// module is an error.
pub fn filter_exposed_apis(
    modules: Vec<ApiModule>,
    exposed: &[String],
) -> Result<Vec<ApiModule>, AssemblyError> {
    if exposed.is_empty() {
        return Ok(modules.into_iter().filter(ApiModule::is_public).collect());
    }

    let mut by_name: HashMap<&'static str, ApiModule> = modules
        .into_iter()
        .map(|module| (module.namespace(), module))
        .collect();

    let mut filtered = Vec::with_capacity(exposed.len());
    for name in exposed {
        let name = name.trim();
        if filtered.iter().any(|module: &ApiModule| module.namespace() == name) {
            continue;
        }
        match by_name.remove(name) {
            Some(module) => filtered.push(module),
            None => return Err(AssemblyError::UnknownModule(name.to_string())),
        }
    }
    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn modules() -> Vec<ApiModule> {
        let echo = |_ctx: CallContext, params: Value| async move { Ok::<_, GatewayError>(params) };
        vec![
            ApiModule::public("cfx").method("cfx_echo", echo),
            ApiModule::public("txpool"),
            ApiModule::private("trace"),
        ]
    }

    fn names(modules: &[ApiModule]) -> Vec<&'static str> {
        modules.iter().map(ApiModule::namespace).collect()
    }

    #[test]
    fn empty_list_exposes_public_modules() {
        let filtered = filter_exposed_apis(modules(), &[]).unwrap();
        assert_eq!(names(&filtered), vec!["cfx", "txpool"]);
    }

    #[test]
    fn explicit_list_is_exact() {
        let filtered = filter_exposed_apis(modules(), &["cfx".to_string()]).unwrap();
        assert_eq!(names(&filtered), vec!["cfx"]);

        let filtered =
            filter_exposed_apis(modules(), &["trace".to_string(), "cfx".to_string()]).unwrap();
        assert_eq!(names(&filtered), vec!["trace", "cfx"]);
    }

    #[test]
    fn duplicates_are_ignored() {
        let filtered =
            filter_exposed_apis(modules(), &["cfx".to_string(), "cfx".to_string()]).unwrap();
        assert_eq!(names(&filtered), vec!["cfx"]);
    }

    #[test]
    fn unknown_module_is_rejected() {
        let err = filter_exposed_apis(modules(), &["cfx".to_string(), "nonexistent".to_string()])
            .unwrap_err();
        assert!(matches!(err, AssemblyError::UnknownModule(ref name) if name == "nonexistent"));
    }

    #[tokio::test]
    async fn closures_are_handlers() {
        let module = modules().remove(0);
        let handler = module.handler("cfx_echo").unwrap();
        let result = handler
            .call(&CallContext::detached(), json!([1, "two"]))
            .await
            .unwrap();
        assert_eq!(result, json!([1, "two"]));
        assert!(module.handler("cfx_missing").is_none());
    }
}
