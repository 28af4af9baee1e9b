//! 511.org StopMonitoring client (SIRI JSON).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::debug_flags::{self, DEBUG_TRANSIT};
use crate::decode;
use crate::error::{Outcome, SourceError};
use crate::http_client::{url_encode, QueueHandle, QueuedRequest, Response};
use crate::source::{self, RefreshCallbacks};
use crate::time_sync::{parse_iso_utc, EpochAnchor};

pub const DEFAULT_BASE_URL: &str = "http://api.511.org/transit";
const REQUEST_KEY: &str = "transit";
pub const BAD_STOP_LINES: [&str; 2] = ["Bad stop code", "Update config"];

// ── Data types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arrival {
    pub route: String,
    pub destination: String,
    pub aimed_epoch: Option<i64>,
    pub expected_epoch: Option<i64>,
    pub at_stop: bool,
    pub occupancy: Option<String>,
}

impl Arrival {
    /// Whole minutes until the expected arrival, rounded toward negative
    /// infinity. `None` when the provider gave no expected time.
    pub fn minutes_until(&self, now_epoch: i64) -> Option<i64> {
        self.expected_epoch.map(|e| (e - now_epoch).div_euclid(60))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitSnapshot {
    pub stop_name: String,
    pub arrivals: Vec<Arrival>,
    pub routes: Vec<String>,
    pub primary_route: String,
    pub response_epoch: Option<i64>,
}

// ── SIRI JSON structures ────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }
}

/// SIRI text nodes show up as plain strings or as lists of strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum TextValue {
    Text(String),
    Many(Vec<String>),
    Other(Value),
}

impl TextValue {
    fn text(&self) -> Option<String> {
        match self {
            TextValue::Text(s) => Some(s.trim().to_string()),
            TextValue::Many(v) => v.first().map(|s| s.trim().to_string()),
            TextValue::Other(Value::Number(n)) => Some(n.to_string()),
            TextValue::Other(_) => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Text(String),
    Detail(ErrorDetail),
    Other(Value),
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorDetail {
    description: Option<String>,
    error_text: Option<String>,
    text: Option<String>,
}

impl ErrorField {
    fn message(&self) -> Option<String> {
        match self {
            ErrorField::Text(s) if !s.is_empty() => Some(s.clone()),
            ErrorField::Detail(d) => d
                .description
                .clone()
                .or_else(|| d.error_text.clone())
                .or_else(|| d.text.clone())
                .filter(|s| !s.is_empty()),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SiriRoot {
    service_delivery: Option<ServiceDelivery>,
    siri: Option<SiriWrapper>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SiriWrapper {
    service_delivery: Option<ServiceDelivery>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorSlots {
    error_condition: Option<ErrorField>,
    error: Option<ErrorField>,
    response_status: Option<ErrorField>,
}

impl ErrorSlots {
    fn message(&self) -> Option<String> {
        [&self.error_condition, &self.error, &self.response_status]
            .into_iter()
            .flatten()
            .find_map(ErrorField::message)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceDelivery {
    response_timestamp: Option<String>,
    #[serde(rename = "ResponseTimeStamp")]
    response_time_stamp: Option<String>,
    stop_monitoring_delivery: Option<OneOrMany<StopMonitoringDelivery>>,
    #[serde(flatten)]
    errors: ErrorSlots,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StopMonitoringDelivery {
    response_timestamp: Option<String>,
    #[serde(rename = "ResponseTimeStamp")]
    response_time_stamp: Option<String>,
    monitored_stop_visit: Option<OneOrMany<StopVisit>>,
    #[serde(flatten)]
    errors: ErrorSlots,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StopVisit {
    monitored_vehicle_journey: Option<VehicleJourney>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VehicleJourney {
    line_ref: Option<TextValue>,
    destination_name: Option<TextValue>,
    monitored_call: Option<MonitoredCall>,
    #[serde(rename = "seatsAvailable")]
    seats_available: Option<Value>,
    occupancy: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MonitoredCall {
    aimed_arrival_time: Option<String>,
    expected_arrival_time: Option<String>,
    vehicle_at_stop: Option<Value>,
    stop_point_name: Option<TextValue>,
}

fn truthy(value: &Option<Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn scalar_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn mentions_stop_code(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("stop") && lowered.contains("code")
}

fn bad_stop_error(message: &str) -> SourceError {
    SourceError::config(format!("provider rejected stop: {}", message), &BAD_STOP_LINES)
}

/// Interpret a StopMonitoring body.
pub fn interpret_payload(text: &str) -> Outcome<TransitSnapshot> {
    let root: SiriRoot = match decode::parse_payload(text) {
        Ok(root) => root,
        Err(e) => return Outcome::Retryable(e),
    };
    let Some(service) = root.service_delivery.or_else(|| root.siri.and_then(|s| s.service_delivery)) else {
        return Outcome::Ok(TransitSnapshot::default());
    };

    let deliveries = service
        .stop_monitoring_delivery
        .map(OneOrMany::into_vec)
        .unwrap_or_default();

    let error_message = service
        .errors
        .message()
        .or_else(|| deliveries.iter().find_map(|d| d.errors.message()));
    if let Some(message) = &error_message {
        if mentions_stop_code(message) {
            warn!("Transit API rejected the stop: {}", message);
            return Outcome::Fatal(bad_stop_error(message));
        }
        debug!("Transit API reported: {}", message);
    }

    let mut snapshot = TransitSnapshot {
        response_epoch: service
            .response_timestamp
            .as_deref()
            .or(service.response_time_stamp.as_deref())
            .and_then(parse_iso_utc),
        ..Default::default()
    };
    if snapshot.response_epoch.is_none() {
        snapshot.response_epoch = deliveries.iter().find_map(|d| {
            d.response_timestamp
                .as_deref()
                .or(d.response_time_stamp.as_deref())
                .and_then(parse_iso_utc)
        });
    }

    let Some(delivery) = deliveries.into_iter().next() else {
        return Outcome::Ok(snapshot);
    };
    let visits = delivery
        .monitored_stop_visit
        .map(OneOrMany::into_vec)
        .unwrap_or_default();

    for visit in visits {
        let Some(journey) = visit.monitored_vehicle_journey else {
            continue;
        };
        let call = journey.monitored_call;
        if let Some(name) = call.as_ref().and_then(|c| c.stop_point_name.as_ref()).and_then(TextValue::text) {
            snapshot.stop_name = name;
        }
        snapshot.arrivals.push(Arrival {
            route: journey.line_ref.as_ref().and_then(TextValue::text).unwrap_or_default(),
            destination: journey.destination_name.as_ref().and_then(TextValue::text).unwrap_or_default(),
            aimed_epoch: call.as_ref().and_then(|c| c.aimed_arrival_time.as_deref()).and_then(parse_iso_utc),
            expected_epoch: call.as_ref().and_then(|c| c.expected_arrival_time.as_deref()).and_then(parse_iso_utc),
            at_stop: call.as_ref().map(|c| truthy(&c.vehicle_at_stop)).unwrap_or(false),
            occupancy: scalar_text(journey.seats_available).or_else(|| scalar_text(journey.occupancy)),
        });
    }
    snapshot.routes = unique_routes(&snapshot.arrivals);
    snapshot.primary_route = primary_route(&snapshot.arrivals);
    Outcome::Ok(snapshot)
}

pub fn unique_routes(arrivals: &[Arrival]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for a in arrivals {
        let route = a.route.trim();
        if !route.is_empty() && !seen.iter().any(|r| r == route) {
            seen.push(route.to_string());
        }
    }
    seen
}

/// Most frequent route; ties go to the tied route seen first.
pub fn primary_route(arrivals: &[Arrival]) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for a in arrivals {
        let route = a.route.trim();
        if !route.is_empty() {
            *counts.entry(route).or_default() += 1;
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for route in unique_routes(arrivals) {
        let count = counts.get(route.as_str()).copied().unwrap_or(0);
        if best.map(|(_, c)| count > c).unwrap_or(true) {
            best = counts.get_key_value(route.as_str()).map(|(k, _)| (*k, count));
        }
    }
    best.map(|(r, _)| r.to_string()).unwrap_or_default()
}

// ── Client ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TransitSettings {
    pub base_url: String,
    pub api_token: String,
    pub agency: String,
    pub stop_code: String,
}

#[derive(Default)]
struct TransitState {
    snapshot: TransitSnapshot,
    anchor: Option<EpochAnchor>,
    last_error: Option<SourceError>,
    /// Stays set through transient failures; only a good payload clears it.
    fatal: Option<SourceError>,
    has_data: bool,
    in_flight: bool,
    failures: u32,
}

#[derive(Clone)]
pub struct TransitClient {
    settings: Rc<TransitSettings>,
    queue: QueueHandle,
    state: Rc<RefCell<TransitState>>,
}

impl TransitClient {
    pub fn new(queue: QueueHandle, settings: TransitSettings) -> Self {
        Self {
            settings: Rc::new(settings),
            queue,
            state: Rc::default(),
        }
    }

    pub fn build_url(&self) -> String {
        let s = &self.settings;
        format!(
            "{}/StopMonitoring?api_key={}&agency={}&stopcode={}&format=json",
            s.base_url.trim_end_matches('/'),
            url_encode(&s.api_token),
            url_encode(&s.agency),
            url_encode(&s.stop_code)
        )
    }

    pub fn request_refresh(&self, callbacks: RefreshCallbacks, timeout: Duration) -> bool {
        if self.settings.api_token.trim().is_empty() {
            let err = SourceError::config("transit api_token is required", &["Set API token", "in config"]);
            {
                let mut st = self.state.borrow_mut();
                st.last_error = Some(err.clone());
                st.fatal = Some(err.clone());
            }
            callbacks.failed(&err);
            return false;
        }
        if self.state.borrow().in_flight {
            return false;
        }

        let callbacks = callbacks.shared();
        let (cb_ok, cb_err) = (callbacks.clone(), callbacks);
        let (state_ok, state_err) = (self.state.clone(), self.state.clone());

        let request = QueuedRequest::get(self.build_url())
            .key(REQUEST_KEY)
            .timeout(timeout)
            .on_success(move |resp: Response| {
                let outcome = interpret_response(&resp);
                match apply_outcome(&state_ok, outcome, Instant::now()) {
                    Ok(()) => cb_ok.updated(),
                    Err(e) => cb_ok.failed(&e),
                }
            })
            .on_error(move |err| {
                let err = SourceError::from(err);
                record_failure(&mut state_err.borrow_mut(), err.clone());
                cb_err.failed(&err);
            });

        let started = self.queue.enqueue(request);
        if started {
            self.state.borrow_mut().in_flight = true;
        }
        started
    }

    pub fn snapshot(&self) -> TransitSnapshot {
        self.state.borrow().snapshot.clone()
    }

    pub fn primary_route(&self) -> String {
        self.state.borrow().snapshot.primary_route.clone()
    }

    pub fn has_data(&self) -> bool {
        self.state.borrow().has_data
    }

    pub fn last_error(&self) -> Option<SourceError> {
        self.state.borrow().last_error.clone()
    }

    /// Display lines while the stop configuration is known to be bad.
    pub fn fatal_lines(&self) -> Option<Vec<String>> {
        self.state.borrow().fatal.as_ref().map(|e| e.display_lines())
    }

    pub fn current_epoch(&self, now: Instant) -> Option<i64> {
        self.state.borrow().anchor.map(|a| a.current_epoch(now))
    }
}

fn interpret_response(resp: &Response) -> Outcome<TransitSnapshot> {
    if resp.status >= 400 {
        if mentions_stop_code(&resp.text) {
            return Outcome::Fatal(bad_stop_error(decode::preview(&resp.text).trim()));
        }
        if decode::json_start(&resp.text).is_none() {
            return Outcome::Retryable(SourceError::Status(resp.status));
        }
    }
    interpret_payload(&resp.text)
}

fn apply_outcome(state: &Rc<RefCell<TransitState>>, outcome: Outcome<TransitSnapshot>, now: Instant) -> Result<(), SourceError> {
    let mut st = state.borrow_mut();
    match outcome {
        Outcome::Ok(snapshot) => {
            if let Some(epoch) = snapshot.response_epoch {
                st.anchor = Some(EpochAnchor::new(epoch, now));
            }
            if debug_flags::is_on(&DEBUG_TRANSIT) {
                info!(
                    "Transit: stop='{}' arrivals={} routes={:?} primary={}",
                    snapshot.stop_name,
                    snapshot.arrivals.len(),
                    snapshot.routes,
                    snapshot.primary_route
                );
            }
            st.snapshot = snapshot;
            st.has_data = true;
            st.last_error = None;
            st.fatal = None;
            st.in_flight = false;
            st.failures = 0;
            Ok(())
        }
        Outcome::Fatal(e) => {
            st.snapshot.arrivals.clear();
            st.in_flight = false;
            st.last_error = Some(e.clone());
            st.fatal = Some(e.clone());
            Err(e)
        }
        Outcome::Retryable(e) => {
            record_failure(&mut st, e.clone());
            Err(e)
        }
    }
}

fn record_failure(st: &mut TransitState, err: SourceError) {
    st.in_flight = false;
    st.failures += 1;
    if source::should_warn(st.failures) {
        warn!("Transit refresh failed ({} in a row): {}", st.failures, err);
    }
    st.last_error = Some(err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::tests::{drain, fake_queue};
    use std::cell::Cell;

    const SAMPLE: &str = r#"{"ServiceDelivery":{"ResponseTimestamp":"2024-06-01T00:00:00Z","ProducerRef":"SF","Status":true,
      "StopMonitoringDelivery":{"version":"1.4","ResponseTimestamp":"2024-06-01T00:00:00Z","Status":true,
        "MonitoredStopVisit":[
          {"MonitoredVehicleJourney":{"LineRef":"N","DestinationName":"Caltrain/Ball Park",
            "MonitoredCall":{"StopPointName":"Carl St & Cole St","VehicleAtStop":"",
              "AimedArrivalTime":"2024-06-01T00:03:00Z","ExpectedArrivalTime":"2024-06-01T00:04:30Z"}}},
          {"MonitoredVehicleJourney":{"LineRef":"N","DestinationName":"Caltrain/Ball Park","seatsAvailable":"SEATS_AVAILABLE",
            "MonitoredCall":{"StopPointName":"Carl St & Cole St","VehicleAtStop":"true",
              "ExpectedArrivalTime":"2024-06-01T00:12:00Z"}}},
          {"MonitoredVehicleJourney":{"LineRef":"NBUS","DestinationName":["Ocean Beach"],
            "MonitoredCall":{"StopPointName":"Carl St & Cole St"}}}
        ]}}}"#;

    fn client(queue: QueueHandle, token: &str) -> TransitClient {
        TransitClient::new(
            queue,
            TransitSettings {
                base_url: DEFAULT_BASE_URL.into(),
                api_token: token.into(),
                agency: "SF".into(),
                stop_code: "13911".into(),
            },
        )
    }

    #[test]
    fn arrivals_routes_and_epoch_are_extracted() {
        let snap = interpret_payload(SAMPLE).into_result().unwrap();
        assert_eq!(snap.stop_name, "Carl St & Cole St");
        assert_eq!(snap.arrivals.len(), 3);
        assert_eq!(snap.routes, vec!["N", "NBUS"]);
        assert_eq!(snap.primary_route, "N");
        assert_eq!(snap.response_epoch, Some(1_717_200_000));

        let first = &snap.arrivals[0];
        assert_eq!(first.destination, "Caltrain/Ball Park");
        assert_eq!(first.aimed_epoch, Some(1_717_200_180));
        assert!(!first.at_stop);
        assert!(snap.arrivals[1].at_stop);
        assert_eq!(snap.arrivals[1].occupancy.as_deref(), Some("SEATS_AVAILABLE"));
        assert_eq!(snap.arrivals[2].destination, "Ocean Beach");
        assert_eq!(snap.arrivals[2].expected_epoch, None);
    }

    #[test]
    fn minutes_until_floors_toward_negative_infinity() {
        let a = Arrival { expected_epoch: Some(1_000), ..Default::default() };
        assert_eq!(a.minutes_until(1_000), Some(0));
        assert_eq!(a.minutes_until(1_000 - 119), Some(1));
        assert_eq!(a.minutes_until(1_000 - 120), Some(2));
        assert_eq!(a.minutes_until(1_001), Some(-1));
        assert_eq!(Arrival::default().minutes_until(0), None);
    }

    #[test]
    fn primary_route_tie_goes_to_first_seen() {
        let arrivals: Vec<Arrival> = ["KT", "J", "J", "KT", " "]
            .iter()
            .map(|r| Arrival { route: r.to_string(), ..Default::default() })
            .collect();
        assert_eq!(primary_route(&arrivals), "KT");
        assert_eq!(primary_route(&[]), "");
    }

    #[test]
    fn preamble_and_bom_are_tolerated() {
        let body = format!("\u{feff}junk before json {}", SAMPLE);
        assert!(matches!(interpret_payload(&body), Outcome::Ok(_)));
    }

    #[test]
    fn invalid_stop_code_is_fatal() {
        let body = r#"{"ServiceDelivery":{"StopMonitoringDelivery":{"ErrorCondition":{"Description":"Invalid stop code: 99999"}}}}"#;
        match interpret_payload(body) {
            Outcome::Fatal(e) => {
                assert!(e.is_fatal());
                assert_eq!(e.display_lines(), vec!["Bad stop code", "Update config"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        let body = r#"{"ServiceDelivery":{"ErrorCondition":"Stopcode is not valid"}}"#;
        assert!(matches!(interpret_payload(body), Outcome::Fatal(_)));
    }

    #[test]
    fn unrelated_provider_errors_are_not_fatal() {
        let body = r#"{"ServiceDelivery":{"ResponseStatus":true,"StopMonitoringDelivery":{"ErrorCondition":{"Description":"Temporarily unavailable"}}}}"#;
        assert!(matches!(interpret_payload(body), Outcome::Ok(_)));
    }

    #[test]
    fn bad_stop_code_scenario_reaches_fatal_state() {
        let (mut queue, log) = fake_queue();
        log.borrow_mut().push(
            200,
            r#"{"ServiceDelivery":{"StopMonitoringDelivery":[{"ErrorCondition":{"Description":"Invalid stop code"}}]}}"#,
        );
        let transit = client(queue.handle(), "token");
        let errored = Rc::new(Cell::new(false));
        let e = errored.clone();
        assert!(transit.request_refresh(
            RefreshCallbacks::new().on_error(move |err: &SourceError| e.set(err.is_fatal())),
            Duration::from_secs(10)
        ));
        drain(&mut queue);
        assert!(errored.get());
        assert_eq!(transit.fatal_lines().unwrap(), vec!["Bad stop code", "Update config"]);
        assert!(transit.snapshot().arrivals.is_empty());
    }

    #[test]
    fn fatal_stop_code_outlives_transient_failures() {
        let (mut queue, log) = fake_queue();
        log.borrow_mut().push(
            200,
            r#"{"ServiceDelivery":{"StopMonitoringDelivery":{"ErrorCondition":{"Description":"Invalid stop code"}}}}"#,
        );
        log.borrow_mut().push_err(crate::error::TransportErrorKind::Timeout);
        log.borrow_mut().push(200, "<html>oops</html>");
        let transit = client(queue.handle(), "token");

        for _ in 0..3 {
            assert!(transit.request_refresh(RefreshCallbacks::new(), Duration::from_secs(10)));
            drain(&mut queue);
            assert_eq!(transit.fatal_lines().unwrap(), vec!["Bad stop code", "Update config"]);
        }
        assert!(matches!(transit.last_error(), Some(SourceError::Parse(_))));

        log.borrow_mut().push(200, SAMPLE);
        transit.request_refresh(RefreshCallbacks::new(), Duration::from_secs(10));
        drain(&mut queue);
        assert_eq!(transit.fatal_lines(), None);
        assert!(transit.last_error().is_none());
    }

    #[test]
    fn payload_without_timestamp_keeps_clock_anchor() {
        let (mut queue, log) = fake_queue();
        log.borrow_mut().push(200, SAMPLE);
        log.borrow_mut().push(200, r#"{"ServiceDelivery":{"StopMonitoringDelivery":{"MonitoredStopVisit":[]}}}"#);
        let transit = client(queue.handle(), "abc");

        transit.request_refresh(RefreshCallbacks::new(), Duration::from_secs(10));
        drain(&mut queue);
        let before = transit.current_epoch(Instant::now()).unwrap();
        transit.request_refresh(RefreshCallbacks::new(), Duration::from_secs(10));
        drain(&mut queue);
        assert!(transit.has_data());
        assert!(transit.current_epoch(Instant::now()).unwrap() >= before);
    }

    #[test]
    fn missing_token_is_a_config_error() {
        let (queue, log) = fake_queue();
        let transit = client(queue.handle(), "");
        assert!(!transit.request_refresh(RefreshCallbacks::new(), Duration::from_secs(10)));
        assert!(transit.last_error().unwrap().is_fatal());
        assert!(log.borrow().requests.is_empty());
    }

    #[test]
    fn refresh_populates_state_and_clock() {
        let (mut queue, log) = fake_queue();
        log.borrow_mut().push(200, SAMPLE);
        let transit = client(queue.handle(), "abc");
        assert!(transit.build_url().contains("stopcode=13911&format=json"));
        let updated = Rc::new(Cell::new(false));
        let u = updated.clone();
        transit.request_refresh(RefreshCallbacks::new().on_update(move || u.set(true)), Duration::from_secs(10));
        drain(&mut queue);
        assert!(updated.get());
        assert!(transit.has_data());
        assert_eq!(transit.primary_route(), "N");
        assert!(transit.current_epoch(Instant::now()).unwrap() >= 1_717_200_000);
    }

    #[test]
    fn garbage_body_is_retryable() {
        assert!(matches!(interpret_payload("<html>oops</html>"), Outcome::Retryable(SourceError::Parse(_))));
    }
}
