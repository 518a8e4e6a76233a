//! Session registry and supervisor behavior, without a socket in the way.

use std::sync::Arc;
use std::time::{Duration, Instant};

use evald_engine::ScriptEvaluatorFactory;
use evald_protocol::{EvalRequest, TIMEOUT_SENTINEL};
use evald_server::{SessionRegistry, Supervisor, SupervisorConfig};

fn registry() -> SessionRegistry {
    SessionRegistry::new(Arc::new(ScriptEvaluatorFactory))
}

fn supervisor_with(registry: SessionRegistry, config: SupervisorConfig) -> Supervisor {
    Supervisor::new(Arc::new(registry), config)
}

fn supervisor() -> Supervisor {
    supervisor_with(registry(), SupervisorConfig::default())
}

async fn run(sup: &Supervisor, key: &str, code: &str) -> String {
    sup.run(&EvalRequest::new(key, code).with_timeout(5_000)).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Session registry
// ─────────────────────────────────────────────────────────────────────────────

mod registry {
    use super::*;

    #[test]
    fn get_or_create_returns_one_instance_per_key() {
        let registry = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get("shared"))
            })
            .collect();
        let sessions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_keys_get_distinct_sessions() {
        let registry = registry();
        let a = registry.get("a");
        let b = registry.get("b");
        assert!(!Arc::ptr_eq(&a, &b));
        let mut keys = registry.keys();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn blank_prelude_is_ignored() {
        assert!(registry().with_prelude("  \n").prelude().is_none());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence and isolation
// ─────────────────────────────────────────────────────────────────────────────

mod sessions {
    use super::*;

    #[tokio::test]
    async fn state_persists_within_a_key() {
        let sup = supervisor();
        assert_eq!(run(&sup, "alice", "let x = 1").await, "");
        assert_eq!(run(&sup, "alice", "x = x + 41").await, "");
        assert_eq!(run(&sup, "alice", "x").await, "42");
    }

    #[tokio::test]
    async fn keys_do_not_share_state() {
        let sup = supervisor();
        run(&sup, "alice", "let secret = 7").await;
        let out = run(&sup, "bob", "secret").await;
        assert!(out.contains("undefined variable"), "got {out:?}");
    }

    #[tokio::test]
    async fn empty_code_is_answered_without_creating_a_session() {
        let sup = supervisor();
        assert_eq!(run(&sup, "ghost", "").await, "");
        assert_eq!(run(&sup, "ghost", " \n\t ").await, "");
        assert!(sup.registry().is_empty());
    }

    #[tokio::test]
    async fn empty_key_is_an_ordinary_session() {
        let sup = supervisor();
        run(&sup, "", "let z = 3").await;
        assert_eq!(run(&sup, "", "z").await, "3");
        assert!(sup.registry().contains(""));
    }

    #[tokio::test]
    async fn faults_are_output_and_keep_earlier_state() {
        let sup = supervisor();
        let out = run(&sup, "k", "let kept = 1\n1 / 0").await;
        assert!(out.contains("division by zero"), "got {out:?}");
        assert_eq!(run(&sup, "k", "kept").await, "1");
    }

    #[tokio::test]
    async fn deeply_nested_snippet_is_answered_as_text() {
        let sup = supervisor();
        run(&sup, "k", "let alive = true").await;
        let parens = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        let out = run(&sup, "k", &parens).await;
        assert!(out.starts_with("syntax error"), "got {out:?}");
        assert_eq!(run(&sup, "k", "alive").await, "true");
    }

    #[tokio::test]
    async fn evaluations_are_counted_per_session() {
        let sup = supervisor();
        run(&sup, "k", "1").await;
        run(&sup, "k", "2").await;
        let session = sup.registry().get("k");
        assert_eq!(session.lock().await.evaluations, 2);
    }

    #[tokio::test]
    async fn prelude_runs_once_and_its_output_is_discarded() {
        let sup = supervisor_with(
            registry().with_prelude("print(\"noise\")\nlet runs = 0\nruns = runs + 1"),
            SupervisorConfig::default(),
        );
        assert_eq!(run(&sup, "k", "runs").await, "1");
        assert_eq!(run(&sup, "k", "runs").await, "1");
        assert_eq!(run(&sup, "other", "runs").await, "1");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Deadlines
// ─────────────────────────────────────────────────────────────────────────────

mod deadlines {
    use super::*;

    #[tokio::test]
    async fn infinite_loop_returns_only_the_sentinel() {
        let sup = supervisor();
        let started = Instant::now();
        let out = sup
            .run(&EvalRequest::new("k", "print(\"partial\")\nwhile true { }").with_timeout(100))
            .await;
        assert_eq!(out, TIMEOUT_SENTINEL);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn zero_timeout_waits_for_completion() {
        let sup = supervisor();
        let out = sup
            .run(&EvalRequest::new("k", "sleep(150)\nprint(\"done\")"))
            .await;
        assert_eq!(out, "done\n");
    }

    #[tokio::test]
    async fn fast_code_beats_its_deadline() {
        let sup = supervisor();
        let out = sup.run(&EvalRequest::new("k", "2 * 21").with_timeout(1_000)).await;
        assert_eq!(out, "42");
    }

    #[tokio::test]
    async fn session_stays_usable_after_timeout() {
        let sup = supervisor();
        run(&sup, "k", "let before = 5").await;
        let out = sup
            .run(&EvalRequest::new("k", "while true { }").with_timeout(50))
            .await;
        assert_eq!(out, TIMEOUT_SENTINEL);
        assert_eq!(run(&sup, "k", "before").await, "5");
    }

    #[tokio::test]
    async fn reset_on_timeout_discards_session_state() {
        let sup = supervisor_with(
            registry(),
            SupervisorConfig {
                reset_on_timeout: true,
            },
        );
        run(&sup, "k", "let before = 5").await;
        let out = sup
            .run(&EvalRequest::new("k", "while true { }").with_timeout(50))
            .await;
        assert_eq!(out, TIMEOUT_SENTINEL);
        let out = run(&sup, "k", "before").await;
        assert!(out.contains("undefined variable"), "got {out:?}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────────────────────────────────────

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn different_keys_run_in_parallel() {
        let sup = supervisor();
        let started = Instant::now();
        let tasks: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|key| {
                let sup = sup.clone();
                tokio::spawn(async move { run(&sup, key, "sleep(300)\n1").await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), "1");
        }
        assert!(started.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_key_requests_never_interleave() {
        let sup = supervisor();
        run(&sup, "counter", "let n = 0").await;

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let sup = sup.clone();
                tokio::spawn(async move { run(&sup, "counter", "let seen = n\nsleep(1)\nn = seen + 1").await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), "");
        }
        assert_eq!(run(&sup, "counter", "n").await, "20");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_key_requests_are_serialized() {
        let sup = supervisor();
        let started = Instant::now();
        let a = tokio::spawn({
            let sup = sup.clone();
            async move { run(&sup, "k", "sleep(200)").await }
        });
        let b = tokio::spawn({
            let sup = sup.clone();
            async move { run(&sup, "k", "sleep(200)").await }
        });
        a.await.unwrap();
        b.await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(400));
    }
}
