use crate::metrics::{AdmissionMetrics, ReviewError};
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::{
    core::{admission, admission::Operation, DynamicObject, TypeMeta},
    Resource, ResourceExt,
};
use std::{convert::Infallible, sync::Arc};
use storage_accessor_controller_core::{AuthorizeError, ClaimRequest, DiscoverScope, Validator};
use storage_accessor_controller_k8s_api::{Accessor, PersistentVolumeClaim};
use tracing::{debug, info, trace, warn};

/// Validates claim creation against the accessors that govern the claim's storage class.
#[derive(Clone)]
pub struct Admission<D> {
    validator: Validator<D>,
    metrics: AdmissionMetrics,
}

/// The admission review dialects this server speaks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ReviewVersion {
    V1,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

type AdmissionRequest = admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = admission::AdmissionResponse;
type AdmissionReview = admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<Bytes>;

const CLAIM_KIND: &str = "PersistentVolumeClaim";
const ACCESSOR_KIND: &str = "Accessor";

// === impl Admission ===

impl<D, B> tower::Service<Request<B>> for Admission<D>
where
    D: DiscoverScope + Clone + 'static,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = future::BoxFuture<'static, std::result::Result<Response<Body>, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        trace!(method = %req.method(), uri = %req.uri(), headers = ?req.headers());
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(empty_response(http::StatusCode::NOT_FOUND)));
        }

        if !is_json(req.headers()) {
            warn!(
                content_type = ?req.headers().get(http::header::CONTENT_TYPE),
                "Unsupported content type"
            );
            self.metrics.failed(ReviewError::ContentType);
            return Box::pin(future::ok(text_response(
                http::StatusCode::BAD_REQUEST,
                "content type must be application/json",
            )));
        }

        let admission = self.clone();
        Box::pin(async move {
            let bytes = match req.into_body().collect().await {
                Ok(body) => body.to_bytes(),
                Err(error) => {
                    let error: BoxError = error.into();
                    warn!(%error, "Failed to read request body");
                    admission.metrics.failed(ReviewError::Request);
                    return Ok(text_response(
                        http::StatusCode::INTERNAL_SERVER_ERROR,
                        "failed to read admission review",
                    ));
                }
            };
            Ok(admission.review(bytes).await)
        })
    }
}

impl<D: DiscoverScope> Admission<D> {
    pub fn new(
        discover: D,
        workspace_label: impl Into<Arc<str>>,
        metrics: AdmissionMetrics,
    ) -> Self {
        Self {
            validator: Validator::new(discover, workspace_label),
            metrics,
        }
    }

    async fn review(self, body: Bytes) -> Response<Body> {
        if body.is_empty() {
            warn!("Empty request body");
            self.metrics.failed(ReviewError::Decode);
            return text_response(
                http::StatusCode::BAD_REQUEST,
                "admission review body is empty",
            );
        }

        let review: AdmissionReview = match serde_json::from_slice(&body) {
            Ok(review) => review,
            Err(error) => {
                warn!(%error, "Failed to parse request body");
                self.metrics.failed(ReviewError::Decode);
                return text_response(
                    http::StatusCode::BAD_REQUEST,
                    format!("failed to parse admission review: {error}"),
                );
            }
        };
        trace!(?review);

        let version = match ReviewVersion::from_types(&review.types) {
            Some(version) => version,
            None => {
                let TypeMeta { api_version, kind } = &review.types;
                warn!(%api_version, %kind, "Unsupported admission review");
                self.metrics.failed(ReviewError::Unsupported);
                return text_response(
                    http::StatusCode::BAD_REQUEST,
                    format!("unsupported admission review: {api_version} {kind}"),
                );
            }
        };

        let req = match version.decode(review) {
            Ok(req) => req,
            Err(error) => {
                warn!(%error, "Invalid admission request");
                self.metrics.failed(ReviewError::Decode);
                return text_response(
                    http::StatusCode::BAD_REQUEST,
                    format!("invalid admission request: {error}"),
                );
            }
        };
        debug!(
            uid = %req.uid,
            kind = %req.kind.kind,
            operation = ?req.operation,
            ns = ?req.namespace,
            name = %req.name,
            "Reviewing"
        );

        let rsp = self.admit(req).await;
        debug!(uid = %rsp.uid, allowed = rsp.allowed, "Reviewed");

        match version.encode(rsp) {
            Ok(bytes) => json_response(bytes),
            Err(error) => {
                warn!(%error, "Failed to encode admission response");
                self.metrics.failed(ReviewError::Encode);
                text_response(
                    http::StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to encode admission response",
                )
            }
        }
    }

    async fn admit(&self, req: AdmissionRequest) -> AdmissionResponse {
        if is_kind::<PersistentVolumeClaim>(&req) {
            let rsp = self.admit_claim(req).await;
            self.metrics.decided(CLAIM_KIND, rsp.allowed);
            return rsp;
        }

        if is_kind::<Accessor>(&req) {
            let rsp = self.lint_accessor(req);
            self.metrics.decided(ACCESSOR_KIND, rsp.allowed);
            return rsp;
        }

        self.metrics.decided("unsupported", false);
        AdmissionResponse::from(&req).deny(format!(
            "unsupported resource type: {}.{}.{}",
            req.kind.group, req.kind.version, req.kind.kind
        ))
    }

    async fn admit_claim(&self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);

        // Only the creation of claims is restricted. Other operations may not carry an object.
        if !matches!(req.operation, Operation::Create) {
            debug!(operation = ?req.operation, "Skipping");
            return rsp;
        }

        let claim = match parse_claim(&req) {
            Ok(Some(claim)) => claim,
            Ok(None) => {
                debug!(ns = ?req.namespace, name = %req.name, "Claim has no storage class");
                return rsp;
            }
            Err(error) => {
                let error = format!("{error:#}");
                info!(%error, "Failed to parse claim");
                return rsp.deny(error);
            }
        };

        match self.validator.admit(&claim).await {
            Ok(()) => {
                debug!(%claim, storage_class = %claim.storage_class, "Allowed");
                rsp
            }
            Err(error) => {
                match &error {
                    AuthorizeError::Denied(_) => info!(%error, "Denied"),
                    AuthorizeError::Resolve(_) => warn!(%error, "Failed to resolve claim scope"),
                }
                rsp.deny(error)
            }
        }
    }

    /// Admits accessors unconditionally, but reports expressions that will never take effect.
    fn lint_accessor(&self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);
        let obj = match req.object {
            Some(obj) => obj,
            None => return rsp,
        };

        let accessor = match serde_json::to_value(obj).and_then(serde_json::from_value::<Accessor>)
        {
            Ok(accessor) => accessor,
            Err(error) => {
                info!(%error, "Failed to parse accessor");
                return rsp.deny(format!("failed to decode Accessor: {error}"));
            }
        };

        let inert = accessor.spec.inert_expressions();
        if !inert.is_empty() {
            self.metrics.linted(inert.len());
            let name = accessor.name_any();
            for expression in &inert {
                warn!(accessor = %name, %expression, "Accessor expression has no effect");
            }
        }

        rsp
    }
}

// === impl ReviewVersion ===

impl ReviewVersion {
    fn from_types(types: &TypeMeta) -> Option<Self> {
        match (types.api_version.as_str(), types.kind.as_str()) {
            ("admission.k8s.io/v1", "AdmissionReview") => Some(Self::V1),
            _ => None,
        }
    }

    fn decode(self, review: AdmissionReview) -> Result<AdmissionRequest> {
        match self {
            Self::V1 => {
                let req: std::result::Result<AdmissionRequest, _> = review.try_into();
                req.map_err(|error| anyhow!("{error}"))
            }
        }
    }

    fn encode(self, rsp: AdmissionResponse) -> serde_json::Result<Vec<u8>> {
        match self {
            Self::V1 => serde_json::to_vec(&rsp.into_review()),
        }
    }
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

/// Extracts the fields that authorization depends on, or `None` if the claim does not name a
/// storage class.
fn parse_claim(req: &AdmissionRequest) -> Result<Option<ClaimRequest>> {
    let obj = req
        .object
        .as_ref()
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;
    let pvc = serde_json::to_value(obj)
        .and_then(serde_json::from_value::<PersistentVolumeClaim>)
        .context("failed to decode PersistentVolumeClaim")?;

    let storage_class = match pvc.spec.as_ref().and_then(|spec| spec.storage_class_name.clone()) {
        Some(storage_class) => storage_class,
        None => return Ok(None),
    };

    Ok(Some(ClaimRequest {
        kind: CLAIM_KIND.to_string(),
        name: pvc.name_any(),
        namespace: pvc
            .namespace()
            .or_else(|| req.namespace.clone())
            .unwrap_or_default(),
        operation: "CREATE".to_string(),
        storage_class,
    }))
}

fn is_json(headers: &http::HeaderMap) -> bool {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

fn json_response(bytes: Vec<u8>) -> Response<Body> {
    Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid")
}

fn text_response(status: http::StatusCode, msg: impl Into<String>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Body::from(msg.into()))
        .expect("error response must be valid")
}

fn empty_response(status: http::StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::default())
        .expect("empty response must be valid")
}
