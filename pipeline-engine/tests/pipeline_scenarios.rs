// End-to-end scenarios driving the engine through its public surface.

use pipeline_engine::{
    load_pipeline, BuildContext, LifecycleManager, MemoryCatalog, PipelineConfig, PipelineRecord,
    PipelineState, PipelineStatus, Registry, StepSpec, Value, WebhookMux, DEFAULT_OUTPUT,
};

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn build_ctx() -> BuildContext {
    BuildContext::new(Arc::new(Registry::with_builtins()))
}

async fn run_once(config: PipelineConfig) -> Arc<PipelineState> {
    let pipeline = load_pipeline(&config, &build_ctx()).unwrap();
    let token = CancellationToken::new();
    pipeline.run(&token).await.unwrap()
}

#[tokio::test]
async fn linear_chain_propagates_through_interpolation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fix.txt");
    write!(std::fs::File::create(&path).unwrap(), "hi").unwrap();

    let config = PipelineConfig {
        steps: vec![
            StepSpec::new("a", "file").with_config("path", format!("'{}'", path.display()).as_str()),
            StepSpec::new("b", "uppercase")
                .with_input("a")
                .with_config("value", "ctx.a"),
            StepSpec::new("c", "stdout")
                .with_input("b")
                .with_config("value", "ctx.b"),
        ],
    };

    let state = run_once(config).await;

    assert_eq!(state.get("a", DEFAULT_OUTPUT), Some(Value::String("hi".into())));
    assert_eq!(state.get("b", DEFAULT_OUTPUT), Some(Value::String("HI".into())));
    assert_eq!(state.get("c", DEFAULT_OUTPUT), Some(Value::String("HI".into())));
}

#[tokio::test]
async fn fan_out_runs_both_consumers() {
    let fields = Value::Array(vec![
        Value::Object(
            [
                ("name".to_string(), Value::String("x".into())),
                ("value".to_string(), Value::String("'1'".into())),
                ("type".to_string(), Value::String("int".into())),
            ]
            .into_iter()
            .collect(),
        ),
        Value::Object(
            [
                ("name".to_string(), Value::String("y".into())),
                ("value".to_string(), Value::String("'2'".into())),
                ("type".to_string(), Value::String("int".into())),
            ]
            .into_iter()
            .collect(),
        ),
    ]);

    let config = PipelineConfig {
        steps: vec![
            StepSpec::new("src", "mapper").with_config("fields", fields),
            StepSpec::new("addX", "stdout")
                .with_input("src")
                .with_config("value", "ctx.src.x"),
            StepSpec::new("addY", "stdout")
                .with_input("src")
                .with_config("value", "ctx.src.y"),
        ],
    };

    let state = run_once(config).await;

    assert_eq!(
        state.get("addX", DEFAULT_OUTPUT),
        Some(Value::String("1".into()))
    );
    assert_eq!(
        state.get("addY", DEFAULT_OUTPUT),
        Some(Value::String("2".into()))
    );
}

#[tokio::test]
async fn conditional_skips_exactly_one_branch() {
    let config = PipelineConfig {
        steps: vec![
            StepSpec::new("g", "if").with_config("condition", "true"),
            StepSpec::new("onT", "stdout")
                .with_input("g:true")
                .with_config("value", "yes"),
            StepSpec::new("onF", "stdout")
                .with_input("g:false")
                .with_config("value", "no"),
        ],
    };

    let state = run_once(config).await;

    assert_eq!(
        state.get("onT", DEFAULT_OUTPUT),
        Some(Value::String("yes".into()))
    );
    assert_eq!(state.get("onF", DEFAULT_OUTPUT), None);
}

#[tokio::test]
async fn foreach_processes_items_sequentially() {
    let fields = Value::Array(vec![Value::Object(
        [
            ("name".to_string(), Value::String("list".into())),
            (
                "value".to_string(),
                Value::Array(vec![Value::Int(10), Value::Int(20), Value::Int(30)]),
            ),
        ]
        .into_iter()
        .collect(),
    )]);

    let sub_steps = Value::Array(vec![Value::Object(
        [
            ("name".to_string(), Value::String("p".into())),
            ("type".to_string(), Value::String("stdout".into())),
            (
                "config".to_string(),
                Value::Object(
                    [(
                        "value".to_string(),
                        Value::String("ctx.foreach.item".into()),
                    )]
                    .into_iter()
                    .collect(),
                ),
            ),
        ]
        .into_iter()
        .collect(),
    )]);

    let config = PipelineConfig {
        steps: vec![
            StepSpec::new("L", "mapper").with_config("fields", fields),
            StepSpec::new("F", "foreach")
                .with_input("L")
                .with_config("list", "ctx.L.list")
                .with_config("steps", sub_steps),
        ],
    };

    let state = run_once(config).await;

    assert_eq!(
        state.get("F", DEFAULT_OUTPUT),
        Some(Value::String("processed 3 items".into()))
    );
}

#[tokio::test]
async fn failed_branch_does_not_prevent_independent_progress() {
    let config = PipelineConfig {
        steps: vec![
            StepSpec::new("bad", "file").with_config("path", "'/definitely/not/here'"),
            StepSpec::new("after_bad", "stdout")
                .with_input("bad")
                .with_config("value", "ctx.bad"),
            StepSpec::new("good", "stdout").with_config("value", "fine"),
        ],
    };

    let state = run_once(config).await;

    assert_eq!(state.get("bad", DEFAULT_OUTPUT), None);
    assert_eq!(state.get("after_bad", DEFAULT_OUTPUT), None);
    assert_eq!(
        state.get("good", DEFAULT_OUTPUT),
        Some(Value::String("fine".into()))
    );
}

fn webhook_config() -> PipelineConfig {
    PipelineConfig {
        steps: vec![
            StepSpec::new("W", "webhook").with_config("method", "GET"),
            StepSpec::new("S", "stdout").with_config("value", "hello"),
        ],
    }
}

async fn serve(mux: &Arc<WebhookMux>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = mux.router();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn webhook_fires_spawn_independent_runs() {
    let mux = Arc::new(WebhookMux::new());
    let ctx = BuildContext::new(Arc::new(Registry::with_builtins())).with_webhooks(mux.clone());
    let pipeline = load_pipeline(&webhook_config(), &ctx).unwrap();

    let states: Arc<Mutex<Vec<Arc<PipelineState>>>> = Arc::new(Mutex::new(Vec::new()));
    let collected = states.clone();
    pipeline.arm_triggers(move |steps_pipeline, _data| {
        let collected = collected.clone();
        tokio::spawn(async move {
            let token = CancellationToken::new();
            if let Ok(state) = steps_pipeline.run(&token).await {
                collected.lock().unwrap().push(state);
            }
        });
    });

    let base = serve(&mux).await;
    for _ in 0..2 {
        let response = reqwest::get(format!("{base}/webhook/W?k=v")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        {
            let states = states.lock().unwrap();
            if states.len() == 2 {
                for state in states.iter() {
                    assert_eq!(
                        state.get("S", DEFAULT_OUTPUT),
                        Some(Value::String("hello".into()))
                    );
                }
                assert!(!Arc::ptr_eq(&states[0], &states[1]));
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected two independent runs"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn webhook_fires_through_lifecycle_record_executions() {
    let mux = Arc::new(WebhookMux::new());
    let catalog = Arc::new(MemoryCatalog::new());
    catalog.insert_pipeline(PipelineRecord {
        id: 1,
        name: "hooked".to_string(),
        enabled: true,
        state: PipelineStatus::Created,
        configuration: webhook_config(),
    });

    let manager = Arc::new(
        LifecycleManager::new(catalog.clone(), Arc::new(Registry::with_builtins()))
            .with_webhooks(mux.clone()),
    );
    let armed = manager.activate_triggers(1).await.unwrap();
    assert_eq!(armed, 1);

    let base = serve(&mux).await;

    for round in 1..=2 {
        let response = reqwest::get(format!("{base}/webhook/W")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let completed = catalog
                .executions_for(1)
                .iter()
                .filter(|e| e.status == PipelineStatus::Completed)
                .count();
            if completed == round {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {round} completed executions"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    let executions = catalog.executions_for(1);
    assert_eq!(executions.len(), 2);
    assert!(executions.iter().all(|e| e.trigger_type == "webhook"));
}

#[tokio::test]
async fn cancellation_terminates_run_with_stopped_state() {
    let catalog = Arc::new(MemoryCatalog::new());
    catalog.insert_pipeline(PipelineRecord {
        id: 5,
        name: "long".to_string(),
        enabled: true,
        state: PipelineStatus::Created,
        configuration: PipelineConfig {
            steps: vec![StepSpec::new("P", "delay").with_config("ms", 10_000i64)],
        },
    });

    let manager = Arc::new(LifecycleManager::new(
        catalog.clone(),
        Arc::new(Registry::with_builtins()),
    ));

    let execution = manager.start(5, "manual", None).await.unwrap();
    manager.stop(5).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(stored) = catalog.execution(execution.id) {
            if stored.status.is_terminal() {
                assert_eq!(stored.status, PipelineStatus::Stopped);
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "run must stop within bounded time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(!manager.is_running(5));
}
