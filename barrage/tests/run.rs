use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use barrage::{
    ConfigError, LoadTest, Policy, TargetConfig,
    assertion::{
        Assertion, AssertionError, AssertionRegistry, AssertionValue, BODY_CONTAINS, Observed,
    },
    config::RefreshConfig,
    stats::StatKey,
    transport::{FnTransport, Transport, TransportError, TransportRequest, TransportResponse},
    variable::{VariableEntry, VariableMap, VariableType},
};
use parking_lot::Mutex;

const RESPONDS_WITH_JSON: &str = "responds-with-json";

#[derive(Debug, Clone, Default)]
struct RespondsWithJson {
    valid: bool,
}

impl Assertion for RespondsWithJson {
    fn name(&self) -> &'static str {
        RESPONDS_WITH_JSON
    }

    fn reads_body(&self) -> bool {
        true
    }

    fn observe(&mut self, observed: &Observed<'_>) -> Result<(), AssertionError> {
        self.valid = observed
            .body
            .is_some_and(|body| serde_json::from_slice::<serde_json::Value>(body).is_ok());
        Ok(())
    }

    fn set_input(&mut self, _: AssertionValue) -> Result<(), AssertionError> {
        Ok(())
    }

    fn set_test(&mut self, _: AssertionValue) -> Result<(), AssertionError> {
        Ok(())
    }

    fn evaluate(&self) -> Result<(), AssertionError> {
        if self.valid {
            Ok(())
        } else {
            Err(AssertionError::Failed {
                name: RESPONDS_WITH_JSON,
                reason: "body is not JSON".to_string(),
            })
        }
    }

    fn box_clone(&self) -> Box<dyn Assertion> {
        Box::new(self.clone())
    }
}

fn target(name: &str, url: &str) -> TargetConfig {
    TargetConfig::builder().name(name).url(url).build()
}

fn declare(token: &str, kind: VariableType, path: &str) -> VariableMap {
    VariableMap::from([(token.to_string(), VariableEntry::new(kind, path))])
}

fn transport<F>(handler: F) -> Arc<dyn Transport>
where
    F: Fn(TransportRequest) -> Result<TransportResponse, TransportError> + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(FnTransport::new(move |request| {
        let handler = handler.clone();
        async move { handler(request) }
    }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_bound_holds_for_every_request() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let observed_max = Arc::new(AtomicUsize::new(0));
    let (current, max) = (in_flight.clone(), observed_max.clone());
    let transport: Arc<dyn Transport> = Arc::new(FnTransport::new(move |_: TransportRequest| {
        let (current, max) = (current.clone(), max.clone());
        async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, TransportError>(TransportResponse::new(200, "ok"))
        }
    }));

    let summary = LoadTest::builder()
        .name("bounded")
        .targets(vec![target("home", "http://localhost/")])
        .concurrency(10)
        .request_count(100)
        .transport(transport)
        .build()
        .run()
        .await
        .unwrap();

    let total = summary.total().unwrap();
    assert_eq!(total.total_sent(), 100);
    assert_eq!(total.counter(StatKey::Success), 100);
    assert!(total.failures().is_empty());
    for key in [StatKey::Timeout, StatKey::ConnectionRefused, StatKey::OtherErrors] {
        assert_eq!(total.counter(key), 0, "{key}");
    }
    assert!(observed_max.load(Ordering::SeqCst) <= 10);
    assert!(total.counter(StatKey::MaxConcurrency) <= 10);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn token_flows_from_login_to_profile() {
    let transport = transport(|request| {
        if request.url.ends_with("/login") {
            return Ok(TransportResponse::new(200, r#"{"data":{"token":"abc","id":7}}"#));
        }
        let authorized = request.header("Authorization") == Some("Bearer abc");
        match (authorized, request.url.as_str()) {
            (true, "http://localhost/users/7") => Ok(TransportResponse::new(200, "robert")),
            _ => Ok(TransportResponse::new(401, "")),
        }
    });

    let mut variables = declare("$token", VariableType::String, "data.token");
    variables.insert(
        "$id".to_string(),
        VariableEntry::new(VariableType::Number, "data.id"),
    );
    let login = TargetConfig::builder()
        .name("login")
        .method("POST")
        .url("http://localhost/login")
        .variables(variables)
        .build();
    let profile = TargetConfig::builder()
        .name("profile")
        .url("http://localhost/users/$id")
        .headers(BTreeMap::from([(
            "Authorization".to_string(),
            "Bearer $token".to_string(),
        )]))
        .assertions(BTreeMap::from([(
            BODY_CONTAINS.to_string(),
            "robert".to_string(),
        )]))
        .build();

    let summary = LoadTest::builder()
        .name("chain")
        .targets(vec![login, profile])
        .concurrency(5)
        .request_count(25)
        .transport(transport)
        .build()
        .run()
        .await
        .unwrap();

    let workers = summary.targeting.workers();
    assert_eq!(workers[1].stats().counter(StatKey::Success), 25);
    assert!(workers[1].stats().failures().is_empty());
    assert_eq!(summary.total().unwrap().total_sent(), 50);
    assert_eq!(summary.reports().len(), 3);
}

#[tokio::test]
async fn failed_chain_link_does_not_stop_the_next() {
    let transport = transport(|request| {
        if request.url.ends_with("/login") {
            Ok(TransportResponse::new(500, "boom"))
        } else {
            Ok(TransportResponse::new(200, request.url))
        }
    });
    let mut login = target("login", "http://localhost/login");
    login.variables = declare("$token", VariableType::String, "token");
    let next = target("next", "http://localhost/next/$token");

    let summary = LoadTest::builder()
        .name("broken chain")
        .targets(vec![login, next])
        .request_count(4)
        .transport(transport)
        .build()
        .run()
        .await
        .unwrap();

    let total = summary.total().unwrap();
    assert_eq!(total.failures(), BTreeMap::from([(500, 4)]));
    assert_eq!(total.counter(StatKey::Success), 4);
}

#[tokio::test]
async fn round_robin_rotates_the_start() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    let transport = transport(move |request| {
        seen.lock().push(request.url.clone());
        Ok(TransportResponse::new(200, ""))
    });

    LoadTest::builder()
        .name("rotation")
        .targets(vec![target("a", "a"), target("b", "b"), target("c", "c")])
        .policy(Policy::RoundRobin)
        .concurrency(1)
        .request_count(3)
        .transport(transport)
        .build()
        .run()
        .await
        .unwrap();

    assert_eq!(
        *order.lock(),
        ["a", "b", "c", "b", "c", "a", "c", "a", "b"]
    );
}

#[tokio::test]
async fn targets_pick_the_policy() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    let transport = transport(move |request| {
        seen.lock().push(request.url.clone());
        Ok(TransportResponse::new(200, ""))
    });
    let round_robin = |name: &str| {
        let mut config = target(name, name);
        config.policy = Some(Policy::RoundRobin);
        config
    };

    LoadTest::builder()
        .name("rotation from targets")
        .targets(vec![round_robin("a"), round_robin("b")])
        .concurrency(1)
        .request_count(2)
        .transport(transport.clone())
        .build()
        .run()
        .await
        .unwrap();
    assert_eq!(*order.lock(), ["a", "b", "b", "a"]);

    let mut parallel = target("b", "b");
    parallel.policy = Some(Policy::Parallel);
    let err = LoadTest::builder()
        .name("disagreeing")
        .targets(vec![round_robin("a"), parallel])
        .transport(transport)
        .build()
        .run()
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ConfigError::ConflictingPolicies {
            first: Policy::RoundRobin,
            second: Policy::Parallel,
        }
    );
}

#[tokio::test]
async fn registered_assertions_run_on_every_response() {
    let mut registry = AssertionRegistry::with_builtins();
    registry.register(RESPONDS_WITH_JSON, |_| Ok(Box::new(RespondsWithJson::default())));
    let mut config = target("api", "api");
    config
        .assertions
        .insert(RESPONDS_WITH_JSON.to_string(), String::new());
    let transport = transport(|_| Ok(TransportResponse::new(200, "plain text")));

    let summary = LoadTest::builder()
        .name("custom assertion")
        .targets(vec![config])
        .request_count(3)
        .registry(registry)
        .transport(transport)
        .build()
        .run()
        .await
        .unwrap();

    let total = summary.total().unwrap();
    assert_eq!(total.counter(StatKey::Success), 0);
    assert_eq!(total.failures(), BTreeMap::from([(200, 3)]));
}

#[tokio::test]
async fn parallel_fires_each_worker_once_per_iteration() {
    let transport = transport(|_| Ok(TransportResponse::new(200, "")));
    let summary = LoadTest::builder()
        .name("parallel")
        .targets(vec![target("a", "a"), target("b", "b")])
        .policy(Policy::Parallel)
        .concurrency(3)
        .request_count(9)
        .transport(transport)
        .build()
        .run()
        .await
        .unwrap();

    for worker in summary.targeting.workers() {
        assert_eq!(worker.stats().total_sent(), 9);
    }
    assert_eq!(summary.total().unwrap().total_sent(), 18);
}

#[tokio::test]
async fn data_source_values_seed_the_first_iteration() {
    let transport = transport(|request| match request.url.as_str() {
        "source" => Ok(TransportResponse::new(200, r#"{"seed":"abc"}"#)),
        "main/abc" => Ok(TransportResponse::new(200, "")),
        _ => Ok(TransportResponse::new(400, "")),
    });
    let mut source = target("source", "source");
    source.variables = declare("$seed", VariableType::String, "seed");

    let summary = LoadTest::builder()
        .name("seeded")
        .targets(vec![target("main", "main/$seed")])
        .data_sources(vec![source])
        .concurrency(2)
        .request_count(6)
        .transport(transport)
        .build()
        .run()
        .await
        .unwrap();

    let total = summary.total().unwrap();
    assert_eq!(total.counter(StatKey::Success), 6);
    assert_eq!(total.total_sent(), 6);
    assert_eq!(summary.targeting.variables()["$seed"].value, "abc");
    assert_eq!(summary.targeting.data_sources()[0].stats().total_sent(), 1);
}

#[tokio::test]
async fn data_sources_refresh_while_running() {
    let transport: Arc<dyn Transport> = Arc::new(FnTransport::new(|request: TransportRequest| async move {
        if request.url != "source" {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok::<_, TransportError>(TransportResponse::new(200, r#"{"seed":"x"}"#))
    }));
    let mut source = target("source", "source");
    source.variables = declare("$seed", VariableType::String, "seed");
    source.refresh = Some(RefreshConfig::millis(5));

    let summary = LoadTest::builder()
        .name("refreshing")
        .targets(vec![target("main", "main")])
        .data_sources(vec![source])
        .request_count(20)
        .transport(transport)
        .build()
        .run()
        .await
        .unwrap();

    assert!(summary.targeting.data_sources()[0].stats().total_sent() >= 2);
    assert_eq!(summary.total().unwrap().total_sent(), 20);
}

#[tokio::test]
async fn configuration_errors_abort_before_dispatch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let transport = transport(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(TransportResponse::new(200, ""))
    });

    let mut bad_assertion = target("a", "a");
    bad_assertion
        .assertions
        .insert("made-up".to_string(), String::new());
    let err = LoadTest::builder()
        .name("bad")
        .targets(vec![target("ok", "ok"), bad_assertion])
        .transport(transport.clone())
        .build()
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::Assertion { .. }));

    let err = LoadTest::builder()
        .name("empty")
        .targets(vec![])
        .transport(transport.clone())
        .build()
        .run()
        .await
        .unwrap_err();
    assert_eq!(err, ConfigError::NoTargets);

    let err = LoadTest::builder()
        .name("overloaded")
        .targets(vec![target("a", "a")])
        .concurrency(5)
        .request_count(2)
        .transport(transport)
        .build()
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::ConcurrencyExceedsRequests { .. }));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
