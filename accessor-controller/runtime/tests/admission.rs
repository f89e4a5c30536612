use anyhow::{anyhow, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{http, Request};
use prometheus_client::registry::Registry;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use storage_accessor_controller_runtime::{
    core::DiscoverScope,
    k8s::{labels, Accessor, Namespace, ObjectMeta, Workspace, WorkspaceSpec},
    Admission, AdmissionMetrics,
};
use tower::ServiceExt;

#[derive(Clone, Default)]
struct Cluster {
    namespaces: BTreeMap<String, Namespace>,
    workspaces: BTreeMap<String, Workspace>,
    accessors: Vec<Accessor>,
}

#[async_trait::async_trait]
impl DiscoverScope for Cluster {
    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        self.namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("namespaces {name:?} not found"))
    }

    async fn get_workspace(&self, name: &str) -> Result<Workspace> {
        self.workspaces
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("workspaces.tenant.kubesphere.io {name:?} not found"))
    }

    async fn list_accessors(&self) -> Result<Vec<Accessor>> {
        Ok(self.accessors.clone())
    }
}

impl Cluster {
    fn with_namespace(mut self, name: &str, labels: &[(&str, &str)]) -> Self {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };
        self.namespaces.insert(name.to_string(), ns);
        self
    }

    fn with_workspace(mut self, name: &str) -> Self {
        self.workspaces.insert(
            name.to_string(),
            Workspace::new(name, WorkspaceSpec::default()),
        );
        self
    }

    fn with_accessor(mut self, accessor: Value) -> Self {
        let accessor = serde_json::from_value(accessor).expect("accessor must decode");
        self.accessors.push(accessor);
        self
    }
}

fn accessor(name: &str, spec: Value) -> Value {
    json!({
        "apiVersion": "storage.kubesphere.io/v1alpha1",
        "kind": "Accessor",
        "metadata": { "name": name },
        "spec": spec
    })
}

/// Only namespaces labeled `env=prod` may claim `fast-ssd`.
fn prod_only() -> Value {
    accessor(
        "fast-ssd-prod",
        json!({
            "storageClassName": "fast-ssd",
            "namespaceSelector": {
                "labelSelector": [{
                    "matchExpressions": [
                        { "key": "env", "operator": "In", "values": ["prod"] }
                    ]
                }]
            }
        }),
    )
}

/// Namespaces in the `restricted-ws` workspace may not claim `fast-ssd`.
fn unrestricted_workspaces() -> Value {
    accessor(
        "fast-ssd-workspaces",
        json!({
            "storageClassName": "fast-ssd",
            "workspaceSelector": {
                "fieldSelector": [{
                    "fieldExpressions": [
                        { "field": "name", "operator": "NotIn", "values": ["restricted-ws"] }
                    ]
                }]
            }
        }),
    )
}

fn claim(namespace: &str, storage_class: Option<&str>) -> Value {
    let mut spec = json!({
        "accessModes": ["ReadWriteOnce"],
        "resources": { "requests": { "storage": "1Gi" } }
    });
    if let Some(sc) = storage_class {
        spec["storageClassName"] = json!(sc);
    }
    json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": { "name": "data", "namespace": namespace },
        "spec": spec
    })
}

fn review(
    kind: (&str, &str, &str),
    operation: &str,
    namespace: &str,
    object: Option<Value>,
) -> Value {
    let (group, version, kind) = kind;
    let resource = format!("{}s", kind.to_lowercase());
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "kind": { "group": group, "version": version, "kind": kind },
            "resource": { "group": group, "version": version, "resource": resource },
            "name": "data",
            "namespace": namespace,
            "operation": operation,
            "userInfo": { "username": "admin", "groups": ["system:authenticated"] },
            "object": object,
            "oldObject": null,
            "dryRun": false
        }
    })
}

fn claim_review(operation: &str, namespace: &str, storage_class: Option<&str>) -> Value {
    let object = match operation {
        "DELETE" => None,
        _ => Some(claim(namespace, storage_class)),
    };
    review(("", "v1", "PersistentVolumeClaim"), operation, namespace, object)
}

fn admission(cluster: Cluster) -> Admission<Cluster> {
    let mut prom = <Registry>::default();
    let metrics = AdmissionMetrics::register(&mut prom);
    Admission::new(cluster, labels::WORKSPACE, metrics)
}

fn post(body: impl Into<Bytes>) -> Request<Full<Bytes>> {
    Request::builder()
        .method(http::Method::POST)
        .uri("/")
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Full::new(body.into()))
        .expect("request must be valid")
}

async fn send(
    admission: Admission<Cluster>,
    req: Request<Full<Bytes>>,
) -> (http::StatusCode, Bytes) {
    let rsp = admission.oneshot(req).await.expect("admission must not fail");
    let status = rsp.status();
    let body = rsp
        .into_body()
        .collect()
        .await
        .expect("body must be readable")
        .to_bytes();
    (status, body)
}

/// Posts a review and returns the decoded `response` stanza.
async fn decide(admission: Admission<Cluster>, review: Value) -> Value {
    let (status, body) = send(admission, post(review.to_string())).await;
    assert_eq!(status, http::StatusCode::OK, "{body:?}");
    let review: Value = serde_json::from_slice(&body).expect("response must be json");
    assert_eq!(review["apiVersion"], "admission.k8s.io/v1");
    assert_eq!(review["kind"], "AdmissionReview");
    let rsp = review["response"].clone();
    assert_eq!(rsp["uid"], "705ab4f5-6393-11e8-b7cc-42010a800002");
    rsp
}

fn allowed(rsp: &Value) -> bool {
    rsp["allowed"].as_bool().expect("response must state a decision")
}

fn message(rsp: &Value) -> &str {
    rsp["status"]["message"].as_str().unwrap_or_default()
}

#[tokio::test(flavor = "current_thread")]
async fn namespace_labels_gate_claims() {
    let cluster = Cluster::default()
        .with_namespace("checkout", &[("env", "prod")])
        .with_namespace("sandbox", &[("env", "dev")])
        .with_accessor(prod_only());

    let rsp = decide(
        admission(cluster.clone()),
        claim_review("CREATE", "checkout", Some("fast-ssd")),
    )
    .await;
    assert!(allowed(&rsp), "{rsp}");

    let rsp = decide(
        admission(cluster),
        claim_review("CREATE", "sandbox", Some("fast-ssd")),
    )
    .await;
    assert!(!allowed(&rsp), "{rsp}");
    let msg = message(&rsp);
    assert!(msg.contains("CREATE"), "{msg}");
    assert!(msg.contains("\"sandbox\""), "{msg}");
    assert!(msg.contains("\"fast-ssd\""), "{msg}");
    assert!(msg.contains("\"fast-ssd-prod\""), "{msg}");
}

#[tokio::test(flavor = "current_thread")]
async fn workspace_fields_gate_claims() {
    let cluster = Cluster::default()
        .with_namespace("team-a", &[(labels::WORKSPACE, "restricted-ws")])
        .with_namespace("team-b", &[(labels::WORKSPACE, "open-ws")])
        .with_namespace("team-c", &[])
        .with_workspace("restricted-ws")
        .with_workspace("open-ws")
        .with_accessor(unrestricted_workspaces());

    let rsp = decide(
        admission(cluster.clone()),
        claim_review("CREATE", "team-a", Some("fast-ssd")),
    )
    .await;
    assert!(!allowed(&rsp), "{rsp}");
    assert!(message(&rsp).contains("\"restricted-ws\""), "{rsp}");

    for ns in ["team-b", "team-c"] {
        let rsp = decide(
            admission(cluster.clone()),
            claim_review("CREATE", ns, Some("fast-ssd")),
        )
        .await;
        assert!(allowed(&rsp), "{ns}: {rsp}");
    }
}

#[tokio::test(flavor = "current_thread")]
async fn failing_accessor_explains_denial() {
    let cluster = Cluster::default()
        .with_namespace(
            "checkout",
            &[("env", "prod"), (labels::WORKSPACE, "restricted-ws")],
        )
        .with_workspace("restricted-ws")
        .with_accessor(prod_only())
        .with_accessor(unrestricted_workspaces());

    let rsp = decide(
        admission(cluster),
        claim_review("CREATE", "checkout", Some("fast-ssd")),
    )
    .await;
    assert!(!allowed(&rsp), "{rsp}");
    let msg = message(&rsp);
    assert!(msg.contains("\"fast-ssd-workspaces\""), "{msg}");
    assert!(!msg.contains("\"fast-ssd-prod\""), "{msg}");
}

#[tokio::test(flavor = "current_thread")]
async fn only_creation_is_restricted() {
    let cluster = Cluster::default()
        .with_namespace("sandbox", &[("env", "dev")])
        .with_accessor(prod_only());

    for op in ["UPDATE", "DELETE"] {
        let rsp = decide(
            admission(cluster.clone()),
            claim_review(op, "sandbox", Some("fast-ssd")),
        )
        .await;
        assert!(allowed(&rsp), "{op}: {rsp}");
    }
}

#[tokio::test(flavor = "current_thread")]
async fn unrestricted_storage_classes() {
    let cluster = Cluster::default()
        .with_namespace("sandbox", &[("env", "dev")])
        .with_accessor(prod_only());

    let rsp = decide(
        admission(cluster.clone()),
        claim_review("CREATE", "sandbox", Some("standard")),
    )
    .await;
    assert!(allowed(&rsp), "{rsp}");

    let rsp = decide(admission(cluster), claim_review("CREATE", "sandbox", None)).await;
    assert!(allowed(&rsp), "{rsp}");
}

#[tokio::test(flavor = "current_thread")]
async fn accessors_without_operators_are_inert() {
    let cluster = Cluster::default()
        .with_namespace("sandbox", &[("env", "dev")])
        .with_accessor(accessor(
            "fast-ssd-incomplete",
            json!({
                "storageClassName": "fast-ssd",
                "namespaceSelector": {
                    "labelSelector": [{
                        "matchExpressions": [{ "key": "env", "values": ["prod"] }]
                    }]
                }
            }),
        ));

    for storage_class in ["fast-ssd", "standard"] {
        let rsp = decide(
            admission(cluster.clone()),
            claim_review("CREATE", "sandbox", Some(storage_class)),
        )
        .await;
        assert!(allowed(&rsp), "{storage_class}: {rsp}");
    }
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_namespaces_fail_closed() {
    let cluster = Cluster::default().with_accessor(prod_only());

    let rsp = decide(
        admission(cluster),
        claim_review("CREATE", "checkout", Some("fast-ssd")),
    )
    .await;
    assert!(!allowed(&rsp), "{rsp}");
    assert!(message(&rsp).contains("\"checkout\""), "{rsp}");
}

#[tokio::test(flavor = "current_thread")]
async fn unsupported_kinds_are_denied() {
    let deployment = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": "data", "namespace": "checkout" }
    });
    let rsp = decide(
        admission(Cluster::default()),
        review(("apps", "v1", "Deployment"), "CREATE", "checkout", Some(deployment)),
    )
    .await;
    assert!(!allowed(&rsp), "{rsp}");
    assert_eq!(message(&rsp), "unsupported resource type: apps.v1.Deployment");
}

#[tokio::test(flavor = "current_thread")]
async fn mismatched_objects_are_denied() {
    // The review claims a PersistentVolumeClaim but carries something that is not one.
    let object = json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": { "name": "data", "namespace": "checkout" },
        "spec": { "storageClassName": ["fast-ssd"] }
    });
    let rsp = decide(
        admission(Cluster::default().with_accessor(prod_only())),
        review(("", "v1", "PersistentVolumeClaim"), "CREATE", "checkout", Some(object)),
    )
    .await;
    assert!(!allowed(&rsp), "{rsp}");
    assert!(
        message(&rsp).contains("failed to decode PersistentVolumeClaim"),
        "{rsp}"
    );
}

#[tokio::test(flavor = "current_thread")]
async fn accessors_with_inert_expressions_are_admitted() {
    let object = accessor(
        "fast-ssd-exists",
        json!({
            "storageClassName": "fast-ssd",
            "namespaceSelector": {
                "labelSelector": [{
                    "matchExpressions": [{ "key": "env", "operator": "Exists" }]
                }],
                "fieldSelector": [{
                    "fieldExpressions": [
                        { "field": "uid", "operator": "In", "values": ["1234"] }
                    ]
                }]
            }
        }),
    );

    let mut prom = <Registry>::default();
    let metrics = AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
    let admission = Admission::new(Cluster::default(), labels::WORKSPACE, metrics);
    let rsp = decide(
        admission,
        review(
            ("storage.kubesphere.io", "v1alpha1", "Accessor"),
            "CREATE",
            "",
            Some(object),
        ),
    )
    .await;
    assert!(allowed(&rsp), "{rsp}");

    let mut text = String::new();
    prometheus_client::encoding::text::encode(&mut text, &prom).expect("metrics must encode");
    assert!(text.contains("admission_accessor_lint_findings_total 2"), "{text}");
    assert!(
        text.contains(r#"admission_reviews_total{kind="Accessor",decision="allowed"} 1"#),
        "{text}"
    );
}

#[tokio::test(flavor = "current_thread")]
async fn malformed_accessors_are_denied() {
    let object = accessor(
        "label-string",
        json!({
            "storageClassName": "fast-ssd",
            "namespaceSelector": { "labelSelector": "env=prod" }
        }),
    );
    let rsp = decide(
        admission(Cluster::default()),
        review(
            ("storage.kubesphere.io", "v1alpha1", "Accessor"),
            "CREATE",
            "",
            Some(object),
        ),
    )
    .await;
    assert!(!allowed(&rsp), "{rsp}");
    assert!(message(&rsp).contains("failed to decode Accessor"), "{rsp}");
}

#[tokio::test(flavor = "current_thread")]
async fn malformed_reviews_are_bad_requests() {
    let v1beta1 = {
        let mut review = claim_review("CREATE", "checkout", Some("fast-ssd"));
        review["apiVersion"] = json!("admission.k8s.io/v1beta1");
        review
    };
    let no_request = json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview"
    });

    for body in [
        String::new(),
        "{\"apiVersion\":".to_string(),
        v1beta1.to_string(),
        no_request.to_string(),
    ] {
        let (status, _) = send(admission(Cluster::default()), post(body.clone())).await;
        assert_eq!(status, http::StatusCode::BAD_REQUEST, "{body}");
    }
}

#[tokio::test(flavor = "current_thread")]
async fn requires_json_content() {
    let body = claim_review("CREATE", "checkout", Some("fast-ssd")).to_string();
    let req = Request::builder()
        .method(http::Method::POST)
        .uri("/")
        .header(http::header::CONTENT_TYPE, "application/yaml")
        .body(Full::new(Bytes::from(body)))
        .expect("request must be valid");
    let (status, _) = send(admission(Cluster::default()), req).await;
    assert_eq!(status, http::StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "current_thread")]
async fn serves_reviews_only_at_root() {
    let get = Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .body(Full::new(Bytes::new()))
        .expect("request must be valid");
    let (status, _) = send(admission(Cluster::default()), get).await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);

    let body = claim_review("CREATE", "checkout", Some("fast-ssd")).to_string();
    let elsewhere = Request::builder()
        .method(http::Method::POST)
        .uri("/validate")
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("request must be valid");
    let (status, _) = send(admission(Cluster::default()), elsewhere).await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);
}

/// A request body whose stream breaks before it completes.
struct ResetBody;

impl hyper::body::Body for ResetBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<std::result::Result<hyper::body::Frame<Bytes>, Self::Error>>> {
        std::task::Poll::Ready(Some(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ))))
    }
}

#[tokio::test(flavor = "current_thread")]
async fn unreadable_bodies_are_server_errors() {
    let mut prom = <Registry>::default();
    let metrics = AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
    let admission = Admission::new(Cluster::default(), labels::WORKSPACE, metrics);

    let req = Request::builder()
        .method(http::Method::POST)
        .uri("/")
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(ResetBody)
        .expect("request must be valid");
    let rsp = admission.oneshot(req).await.expect("admission must not fail");
    assert_eq!(rsp.status(), http::StatusCode::INTERNAL_SERVER_ERROR);

    let mut text = String::new();
    prometheus_client::encoding::text::encode(&mut text, &prom).expect("metrics must encode");
    assert!(
        text.contains(r#"admission_review_errors_total{reason="request"} 1"#),
        "{text}"
    );
}
