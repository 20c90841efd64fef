//! Hook pipeline tests: ordering discipline and failure wrapping.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use modflow::{
    Hook, HookRegistration, InvocationContext, KwArgs, ModError, Module, ModuleNode, Payload,
};
use serde_json::{json, Value};

struct Recording {
    tag: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Hook for Recording {
    fn pre(&self, _payload: &Payload, _kw: &KwArgs) {
        self.log.lock().unwrap().push(format!("{}.pre", self.tag));
    }

    fn post(&self, _result: &Value) {
        self.log.lock().unwrap().push(format!("{}.post", self.tag));
    }

    fn report(&self) {
        self.log.lock().unwrap().push(format!("{}.report", self.tag));
    }
}

struct Probe {
    node: ModuleNode,
    log: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

#[async_trait]
impl Module for Probe {
    fn node(&self) -> &ModuleNode {
        &self.node
    }

    fn kind(&self) -> &'static str {
        "Probe"
    }

    async fn forward(
        &self,
        _payload: Payload,
        _kw: KwArgs,
        _ctx: &InvocationContext,
    ) -> modflow::Result<Value> {
        self.log.lock().unwrap().push("call".to_string());
        if self.fail {
            return Err(ModError::internal("forward exploded"));
        }
        Ok(json!("done"))
    }
}

fn probe_with_hooks(fail: bool) -> (Probe, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let probe = Probe {
        node: ModuleNode::new(),
        log: log.clone(),
        fail,
    };
    for tag in ["h1", "h2"] {
        let hook: Arc<dyn Hook> = Arc::new(Recording {
            tag,
            log: log.clone(),
        });
        probe.node().register_hook(HookRegistration::Instance(hook));
    }
    (probe, log)
}

#[tokio::test]
async fn test_pre_post_inversion_and_report_order() {
    let (probe, log) = probe_with_hooks(false);
    let ctx = InvocationContext::new();
    let result = probe.call(Payload::from("x"), KwArgs::new(), &ctx).await.unwrap();
    assert_eq!(result, json!("done"));

    let entries = log.lock().unwrap().clone();
    assert_eq!(
        entries,
        vec![
            "h1.pre", "h2.pre", "call", "h2.post", "h1.post", "h1.report", "h2.report"
        ]
    );
}

#[tokio::test]
async fn test_failed_call_skips_post_and_report() {
    let (probe, log) = probe_with_hooks(true);
    let ctx = InvocationContext::new();
    let err = probe
        .call(Payload::from("x"), KwArgs::new(), &ctx)
        .await
        .unwrap_err();

    let entries = log.lock().unwrap().clone();
    assert_eq!(entries, vec!["h1.pre", "h2.pre", "call"]);

    // the wrapper carries module identity, arguments and the nested error
    let text = err.to_string();
    assert!(text.contains("Probe"));
    assert!(text.contains("forward exploded"));
    assert!(text.contains("\"x\""));
}

#[tokio::test]
async fn test_context_extras_merged_into_call() {
    struct KwEcho {
        node: ModuleNode,
    }

    #[async_trait]
    impl Module for KwEcho {
        fn node(&self) -> &ModuleNode {
            &self.node
        }

        async fn forward(
            &self,
            _payload: Payload,
            kw: KwArgs,
            _ctx: &InvocationContext,
        ) -> modflow::Result<Value> {
            Ok(Value::Object(kw))
        }
    }

    let m = KwEcho {
        node: ModuleNode::new(),
    };
    let ctx = InvocationContext::new();
    let mut params = KwArgs::new();
    params.insert("temperature".into(), json!(0.1));
    ctx.set_global_params(m.node().id().as_str(), params);
    ctx.set_history(m.node().id().as_str(), json!([["q", "a"]]));

    let out = m.call(Payload::None, KwArgs::new(), &ctx).await.unwrap();
    assert_eq!(out["temperature"], json!(0.1));
    assert_eq!(out["history"], json!([["q", "a"]]));
}
