//! TransferService client
//!
//! The three BiPRO transfer operations against one carrier:
//! `listShipments` (with continuation-marker pagination), `getShipment`
//! (MTOM download) and `acknowledgeShipment`. Every call authenticates
//! through the shared token cache, takes a rate-limiter token and retries
//! transient failures with full-jitter exponential backoff.

use chrono::{DateTime, NaiveDate, Utc};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::{classify_auth_fault, AuthMaterial, Authenticator, Credentials};
use crate::carrier::Carrier;
use crate::error::TransferError;
use crate::mtom::{self, MtomDocument};
use crate::ratelimit::RateLimiter;
use crate::transport::{HttpRequest, HttpResponse, SharedTransport};
use crate::wsse;

/// Maximum attempts per operation (first try plus retries).
const MAX_ATTEMPTS: u32 = 4;
/// First backoff step; doubles per attempt, full jitter applied.
const BACKOFF_BASE: Duration = Duration::from_millis(500);
/// Hard cap on pagination rounds; a carrier resending the same marker
/// forever must not hang the sync.
const MAX_PAGES: usize = 100;

const ACTION_LIST: &str = "urn:ListShipments";
const ACTION_GET: &str = "urn:GetShipment";
const ACTION_ACK: &str = "urn:AcknowledgeShipment";

/// BiPRO error code for an unknown shipment id.
const ERR_UNKNOWN_SHIPMENT: &str = "liefernummer_unbekannt";

/// One entry of the carrier's shipment list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentInfo {
    /// Opaque shipment identifier.
    pub id: String,
    /// 9-digit hierarchical BiPRO category code.
    pub category: String,
    pub created_at: Option<DateTime<Utc>>,
    /// `false` means the shipment still awaits download + acknowledge.
    pub confirmed: bool,
}

/// Downloaded shipment: documents plus the raw envelope for the archive.
#[derive(Debug, Clone)]
pub struct ShipmentContent {
    pub shipment_id: String,
    pub carrier: String,
    pub documents: Vec<MtomDocument>,
    /// XOP-inlined SOAP envelope, retained verbatim.
    pub raw_envelope: String,
}

impl ShipmentContent {
    /// A shipment may only be acknowledged when every referenced part came
    /// through.
    pub fn has_missing_parts(&self) -> bool {
        self.documents.iter().any(|d| d.missing_part)
    }
}

/// Filter for `listShipments`.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// `false` (default) lists pending shipments.
    pub confirmed: bool,
    /// Optional category code prefix.
    pub category_prefix: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// SOAP client for one carrier's TransferService.
pub struct TransferClient {
    carrier: Carrier,
    credentials: Credentials,
    transport: SharedTransport,
    authenticator: Arc<Authenticator>,
    limiter: Arc<RateLimiter>,
}

impl TransferClient {
    pub fn new(
        carrier: Carrier,
        credentials: Credentials,
        transport: SharedTransport,
        authenticator: Arc<Authenticator>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            carrier,
            credentials,
            transport,
            authenticator,
            limiter,
        }
    }

    pub fn carrier(&self) -> &Carrier {
        &self.carrier
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// List shipments, following continuation markers until exhausted.
    /// The aggregated list preserves the carrier's ordering.
    pub async fn list_shipments(
        &self,
        filter: &ListFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<ShipmentInfo>, TransferError> {
        let mut shipments = Vec::new();
        let mut continuation: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let body = list_request_body(filter, continuation.as_deref());
            let response = self
                .call(ACTION_LIST, body, self.carrier.timeouts.read(), cancel, |_| false)
                .await?;
            let page = parse_list_response(&String::from_utf8_lossy(&response.body))?;
            debug!(
                carrier = %self.carrier.name,
                count = page.shipments.len(),
                more = page.continuation.is_some(),
                "listShipments page"
            );
            shipments.extend(page.shipments);
            match page.continuation {
                Some(marker) => continuation = Some(marker),
                None => return Ok(shipments),
            }
        }
        Err(TransferError::Fatal(
            "listShipments pagination did not terminate".into(),
        ))
    }

    /// Download one shipment as an MTOM multipart and split it.
    pub async fn get_shipment(
        &self,
        shipment_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ShipmentContent, TransferError> {
        let body = format!(
            r#"<transfer:getShipment xmlns:transfer="{ns}"><transfer:ID>{id}</transfer:ID></transfer:getShipment>"#,
            ns = wsse::BIPRO_TRANSFER_NS,
            id = escape(shipment_id),
        );
        let response = self
            .call(ACTION_GET, body, self.carrier.timeouts.read(), cancel, |_| false)
            .await
            .map_err(|e| match e {
                TransferError::NotFound(_) => TransferError::NotFound(shipment_id.to_string()),
                other => other,
            })?;

        let content_type = response.header("content-type").unwrap_or("text/xml");
        let message = mtom::split_response(content_type, &response.body)?;
        Ok(ShipmentContent {
            shipment_id: shipment_id.to_string(),
            carrier: self.carrier.name.clone(),
            documents: message.documents,
            raw_envelope: message.envelope,
        })
    }

    /// Confirm receipt of a persisted shipment. A carrier-side "already
    /// acknowledged" response counts as success.
    pub async fn acknowledge_shipment(
        &self,
        shipment_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let body = format!(
            r#"<transfer:acknowledgeShipment xmlns:transfer="{ns}"><transfer:ID>{id}</transfer:ID></transfer:acknowledgeShipment>"#,
            ns = wsse::BIPRO_TRANSFER_NS,
            id = escape(shipment_id),
        );
        self.call(
            ACTION_ACK,
            body,
            self.carrier.timeouts.acknowledge(),
            cancel,
            is_already_acknowledged,
        )
        .await?;
        Ok(())
    }

    /// Authenticated SOAP round-trip with rate limiting, retry and error
    /// classification. `also_ok` lets an operation accept specific non-2xx
    /// responses as success.
    async fn call(
        &self,
        action: &str,
        body: String,
        timeout: Duration,
        cancel: &CancellationToken,
        also_ok: impl Fn(&HttpResponse) -> bool,
    ) -> Result<HttpResponse, TransferError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.limiter.acquire(cancel).await?;

            let material = self
                .authenticator
                .authenticate(&self.carrier, &self.credentials, cancel)
                .await?;
            let security = match &material {
                AuthMaterial::Bearer(token) => format!(
                    "{}{}",
                    wsse::timestamp("TS-1", Utc::now()),
                    String::from_utf8_lossy(&token.assertion)
                ),
                AuthMaterial::MutualTls => wsse::timestamp("TS-1", Utc::now()),
            };
            let envelope = wsse::envelope(&security, action, &self.carrier.transfer_url, &body);
            let request = HttpRequest::post(
                self.carrier.transfer_url.clone(),
                envelope.into_bytes(),
                timeout,
            )
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", action);

            let error = match self.transport.execute(request, cancel).await {
                Ok(response) if response.is_success() || also_ok(&response) => {
                    return Ok(response);
                }
                Ok(response) => classify_response(&response),
                Err(e) => e,
            };

            match &error {
                TransferError::Auth(_) => {
                    if let AuthMaterial::Bearer(token) = material {
                        self.authenticator.invalidate(&self.carrier, token.variant);
                    }
                    return Err(error);
                }
                TransferError::Throttled { retry_after } => {
                    // The limiter pauses until Retry-After; the next
                    // acquire blocks accordingly.
                    self.limiter.on_throttled(*retry_after);
                    if attempt >= MAX_ATTEMPTS {
                        return Err(error);
                    }
                    warn!(carrier = %self.carrier.name, attempt, "throttled, retrying");
                }
                TransferError::Transient(reason) => {
                    self.limiter.on_transient();
                    if attempt >= MAX_ATTEMPTS {
                        return Err(error);
                    }
                    let backoff = backoff_with_jitter(attempt);
                    warn!(
                        carrier = %self.carrier.name,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        reason = %reason,
                        "transient failure, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                _ => return Err(error),
            }
        }
    }
}

/// Exponential backoff with full jitter: uniform in (0, base * 2^attempt].
fn backoff_with_jitter(attempt: u32) -> Duration {
    let max = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(attempt - 1));
    let millis = rand::thread_rng().gen_range(1..=max.as_millis().max(1) as u64);
    Duration::from_millis(millis)
}

fn classify_response(response: &HttpResponse) -> TransferError {
    let body = String::from_utf8_lossy(&response.body);
    if let Some(auth) = classify_auth_fault(response.status, &body) {
        return auth;
    }
    if body.contains(ERR_UNKNOWN_SHIPMENT) {
        return TransferError::NotFound(ERR_UNKNOWN_SHIPMENT.into());
    }
    match response.status {
        429 => TransferError::Throttled {
            retry_after: response.retry_after(),
        },
        404 => TransferError::NotFound("HTTP 404".into()),
        s if s >= 500 => TransferError::Transient(format!("carrier returned HTTP {s}")),
        s => TransferError::Fatal(format!("carrier returned HTTP {s}")),
    }
}

fn is_already_acknowledged(response: &HttpResponse) -> bool {
    let body = String::from_utf8_lossy(&response.body).to_lowercase();
    body.contains("bereits bestaetigt")
        || body.contains("bereits bestätigt")
        || body.contains("already acknowledged")
}

fn list_request_body(filter: &ListFilter, continuation: Option<&str>) -> String {
    let ns = wsse::BIPRO_TRANSFER_NS;
    let mut inner = format!("<transfer:Bestaetigt>{}</transfer:Bestaetigt>", filter.confirmed);
    if let Some(prefix) = &filter.category_prefix {
        inner.push_str(&format!(
            "<transfer:Kategorie>{}</transfer:Kategorie>",
            escape(prefix.as_str())
        ));
    }
    if let Some(from) = filter.from {
        inner.push_str(&format!("<transfer:Von>{from}</transfer:Von>"));
    }
    if let Some(to) = filter.to {
        inner.push_str(&format!("<transfer:Bis>{to}</transfer:Bis>"));
    }
    if let Some(marker) = continuation {
        inner.push_str(&format!(
            "<transfer:Fortsetzungsreferenz>{}</transfer:Fortsetzungsreferenz>",
            escape(marker)
        ));
    }
    format!(r#"<transfer:listShipments xmlns:transfer="{ns}">{inner}</transfer:listShipments>"#)
}

struct ListPage {
    shipments: Vec<ShipmentInfo>,
    continuation: Option<String>,
}

fn parse_list_response(xml: &str) -> Result<ListPage, TransferError> {
    let mut reader = Reader::from_str(xml);
    let mut shipments = Vec::new();
    let mut continuation = None;

    let mut in_shipment = false;
    let mut field: Option<String> = None;
    let mut current = ShipmentInfo {
        id: String::new(),
        category: String::new(),
        created_at: None,
        confirmed: false,
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let local = String::from_utf8_lossy(start.local_name().as_ref()).to_ascii_lowercase();
                if local == "lieferung" {
                    in_shipment = true;
                    current = ShipmentInfo {
                        id: String::new(),
                        category: String::new(),
                        created_at: None,
                        confirmed: false,
                    };
                } else {
                    field = Some(local);
                }
            }
            Ok(Event::Text(text)) => {
                let value = match text.unescape() {
                    Ok(v) => v.trim().to_string(),
                    Err(_) => continue,
                };
                if value.is_empty() {
                    continue;
                }
                match (in_shipment, field.as_deref()) {
                    (true, Some("id")) | (true, Some("lieferungsnummer")) => current.id = value,
                    (true, Some("kategorie")) => current.category = value,
                    (true, Some("erstellungsdatum")) => {
                        current.created_at = DateTime::parse_from_rfc3339(&value)
                            .ok()
                            .map(|d| d.with_timezone(&Utc));
                    }
                    (true, Some("bestaetigt")) => current.confirmed = value == "true" || value == "1",
                    (false, Some("fortsetzungsreferenz")) => continuation = Some(value),
                    _ => {}
                }
            }
            Ok(Event::End(end)) => {
                let local = String::from_utf8_lossy(end.local_name().as_ref()).to_ascii_lowercase();
                if local == "lieferung" {
                    in_shipment = false;
                    if current.id.is_empty() {
                        return Err(TransferError::Fatal(
                            "shipment list entry without an ID".into(),
                        ));
                    }
                    shipments.push(std::mem::replace(
                        &mut current,
                        ShipmentInfo {
                            id: String::new(),
                            category: String::new(),
                            created_at: None,
                            confirmed: false,
                        },
                    ));
                } else {
                    field = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(TransferError::Fatal(format!(
                    "malformed listShipments response: {e}"
                )))
            }
            _ => {}
        }
    }

    Ok(ListPage {
        shipments,
        continuation,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::transport::HttpTransport;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport fake fed with a fixed script of responses.
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Result<HttpResponse, TransferError>>>,
        pub requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Result<HttpResponse, TransferError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        /// Requests sent to a given URL, for asserting call patterns.
        pub fn requests_to(&self, url_fragment: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.url.contains(url_fragment))
                .count()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(
            &self,
            request: HttpRequest,
            cancel: &CancellationToken,
        ) -> Result<HttpResponse, TransferError> {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            self.requests.lock().unwrap().push(request);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransferError::Fatal("transport script exhausted".into())))
        }
    }

    pub fn soap_ok(body_inner: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: vec![("Content-Type".into(), "text/xml; charset=utf-8".into())],
            body: format!(
                r#"<?xml version="1.0"?><soapenv:Envelope xmlns:soapenv="{}"><soapenv:Body>{}</soapenv:Body></soapenv:Envelope>"#,
                wsse::SOAP_NS,
                body_inner
            )
            .into_bytes(),
        }
    }

    /// A valid RequestSecurityTokenResponse for the scripted STS.
    pub fn sts_ok() -> HttpResponse {
        soap_ok(&format!(
            r#"<wst:RequestSecurityTokenResponse xmlns:wst="{}"><wst:RequestedSecurityToken><saml2:Assertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" ID="a-1">ok</saml2:Assertion></wst:RequestedSecurityToken></wst:RequestSecurityTokenResponse>"#,
            wsse::WST_NS
        ))
    }

    pub fn list_body(entries: &[(&str, &str, bool)], continuation: Option<&str>) -> String {
        let ns = wsse::BIPRO_TRANSFER_NS;
        let mut inner = String::new();
        for (id, category, confirmed) in entries {
            inner.push_str(&format!(
                "<transfer:Lieferung><transfer:ID>{id}</transfer:ID><transfer:Kategorie>{category}</transfer:Kategorie><transfer:Erstellungsdatum>2025-01-31T10:00:00Z</transfer:Erstellungsdatum><transfer:Bestaetigt>{confirmed}</transfer:Bestaetigt></transfer:Lieferung>"
            ));
        }
        if let Some(marker) = continuation {
            inner.push_str(&format!(
                "<transfer:Fortsetzungsreferenz>{marker}</transfer:Fortsetzungsreferenz>"
            ));
        }
        format!(r#"<transfer:listShipmentsResponse xmlns:transfer="{ns}">{inner}</transfer:listShipmentsResponse>"#)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::auth::Secret;
    use crate::carrier::{AuthVariant, CarrierTimeouts};
    use crate::clock::SystemClock;
    use crate::ratelimit::RateLimiterConfig;
    use crate::token::TokenCache;

    fn carrier() -> Carrier {
        Carrier {
            name: "alpha".into(),
            sts_url: "https://sts.alpha.example/sts".into(),
            transfer_url: "https://transfer.alpha.example/svc".into(),
            extranet_url: None,
            consumer_id: None,
            auth_variants: vec![AuthVariant::UsernamePassword],
            easylogin_source: None,
            timeouts: CarrierTimeouts::default(),
        }
    }

    fn client(script: Vec<Result<HttpResponse, TransferError>>) -> (TransferClient, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(script));
        let clock = Arc::new(SystemClock);
        let cache = Arc::new(TokenCache::new(clock.clone()));
        let authenticator = Arc::new(Authenticator::new(transport.clone(), cache, clock));
        let limiter = Arc::new(RateLimiter::new(
            "alpha",
            RateLimiterConfig {
                initial: 10.0,
                ..RateLimiterConfig::default()
            },
        ));
        let client = TransferClient::new(
            carrier(),
            Credentials::UsernamePassword {
                username: "broker".into(),
                password: Secret::new("pw"),
            },
            transport.clone(),
            authenticator,
            limiter,
        );
        (client, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_follows_continuation_markers() {
        let (client, transport) = client(vec![
            Ok(sts_ok()),
            Ok(soap_ok(&list_body(
                &[("S-100", "100100000", false), ("S-101", "100100000", false)],
                Some("page-2"),
            ))),
            Ok(soap_ok(&list_body(&[("S-102", "200000000", false)], None))),
        ]);
        let cancel = CancellationToken::new();
        let shipments = client
            .list_shipments(&ListFilter::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(
            shipments.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["S-100", "S-101", "S-102"]
        );
        assert!(!shipments[0].confirmed);
        // One STS round-trip, two list pages.
        assert_eq!(transport.requests_to("sts.alpha"), 1);
        assert_eq!(transport.requests_to("transfer.alpha"), 2);
        // The second page request carries the marker.
        let requests = transport.requests.lock().unwrap();
        let second_page = String::from_utf8_lossy(&requests[2].body).into_owned();
        assert!(second_page.contains("page-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_shipment_not_found() {
        let fault = HttpResponse {
            status: 404,
            headers: vec![],
            body: format!(
                r#"<transfer:Nachricht xmlns:transfer="{}"><transfer:Fehlercode>liefernummer_unbekannt</transfer:Fehlercode></transfer:Nachricht>"#,
                wsse::BIPRO_TRANSFER_NS
            )
            .into_bytes(),
        };
        let (client, _) = client(vec![Ok(sts_ok()), Ok(fault)]);
        let cancel = CancellationToken::new();
        let err = client.get_shipment("S-999", &cancel).await.unwrap_err();
        match err {
            TransferError::NotFound(id) => assert_eq!(id, "S-999"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_retry_then_success() {
        let (client, transport) = client(vec![
            Ok(sts_ok()),
            Ok(HttpResponse {
                status: 503,
                headers: vec![],
                body: b"unavailable".to_vec(),
            }),
            Ok(soap_ok(&list_body(&[("S-100", "100100000", false)], None))),
        ]);
        let cancel = CancellationToken::new();
        let shipments = client
            .list_shipments(&ListFilter::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(shipments.len(), 1);
        assert_eq!(transport.requests_to("transfer.alpha"), 2);
        // Transient feedback shrank the limiter.
        assert!(client.limiter().snapshot().width < 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_surfaces_transient() {
        let failures = std::iter::once(Ok(sts_ok()))
            .chain((0..MAX_ATTEMPTS).map(|_| {
                Ok(HttpResponse {
                    status: 500,
                    headers: vec![],
                    body: Vec::new(),
                })
            }))
            .collect();
        let (client, transport) = client(failures);
        let cancel = CancellationToken::new();
        let err = client
            .list_shipments(&ListFilter::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transient");
        assert_eq!(transport.requests_to("transfer.alpha"), MAX_ATTEMPTS as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_fault_invalidates_and_does_not_retry() {
        let fault = HttpResponse {
            status: 500,
            headers: vec![],
            body: b"<faultcode>wsse:InvalidSecurityToken</faultcode><faultstring>token expired</faultstring>"
                .to_vec(),
        };
        let (client, transport) = client(vec![Ok(sts_ok()), Ok(fault)]);
        let cancel = CancellationToken::new();
        let err = client
            .list_shipments(&ListFilter::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "auth");
        assert_eq!(transport.requests_to("transfer.alpha"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_waits_retry_after_then_succeeds() {
        let throttle = HttpResponse {
            status: 429,
            headers: vec![("Retry-After".into(), "2".into())],
            body: Vec::new(),
        };
        let (client, _) = client(vec![
            Ok(sts_ok()),
            Ok(throttle),
            Ok(soap_ok(&list_body(&[("S-100", "100100000", false)], None))),
        ]);
        let cancel = CancellationToken::new();
        let width_before = client.limiter().snapshot().width;
        let started = tokio::time::Instant::now();
        let shipments = client
            .list_shipments(&ListFilter::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(shipments.len(), 1);
        assert!(tokio::time::Instant::now() - started >= Duration::from_secs(2));
        assert_eq!(client.limiter().snapshot().width, width_before * 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_already_acknowledged_is_success() {
        let already = HttpResponse {
            status: 500,
            headers: vec![],
            body: "<faultstring>Lieferung bereits bestätigt</faultstring>".into(),
        };
        let (client, _) = client(vec![Ok(sts_ok()), Ok(already)]);
        let cancel = CancellationToken::new();
        client.acknowledge_shipment("S-100", &cancel).await.unwrap();
    }

    #[test]
    fn test_parse_list_rejects_entry_without_id() {
        let xml = format!(
            r#"<r xmlns:transfer="{ns}"><transfer:Lieferung><transfer:Kategorie>1</transfer:Kategorie></transfer:Lieferung></r>"#,
            ns = wsse::BIPRO_TRANSFER_NS
        );
        assert!(parse_list_response(&xml).is_err());
    }
}
