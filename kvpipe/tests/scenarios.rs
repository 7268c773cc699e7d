use std::sync::Arc;

use anyhow::Result;
use kvpipe::prelude::*;
use kvpipe::{nested_autoexec, Coordinator, PoolId};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn registry_with(names: &[&str]) -> (ConnectionRegistry, Vec<MemoryConnector>) {
    init_tracing();
    let registry = ConnectionRegistry::new();
    let backends: Vec<MemoryConnector> = names.iter().map(|_| MemoryConnector::new()).collect();
    for (name, backend) in names.iter().zip(&backends) {
        registry.connect(backend.clone(), Some(name)).expect("connect");
    }
    (registry, backends)
}

/// Counts a page view and returns the new total.
fn count_view(registry: &ConnectionRegistry, pipe: Option<&mut dyn Pipe>, page: &str) -> PipeResult<Future> {
    registry.autoexec(pipe, None, |pipe| Ok(pipe.incr(format!("views:{page}"))))
}

/// Stores a profile and reads back its field count, on the "users" connection.
fn save_profile(registry: &ConnectionRegistry, pipe: Option<&mut dyn Pipe>, id: u32, name: &str) -> PipeResult<Future> {
    registry.autoexec(pipe, Some("users"), |pipe| {
        let key = format!("user:{id}");
        pipe.hset(&key, "name", name);
        Ok(pipe.hgetall(&key))
    })
}

#[test]
fn set_then_get_in_one_scope() -> Result<()> {
    let (registry, backends) = registry_with(&["default"]);
    let value = registry.autoexec(None, None, |pipe| -> Result<Future> {
        pipe.set("foo", "bar");
        Ok(pipe.get("foo"))
    })?;

    assert_eq!(value.text()?, "bar");
    assert_eq!(backends[0].round_trips(), 1);
    Ok(())
}

#[test]
fn helpers_compose_into_a_single_batch() -> Result<()> {
    let (registry, backends) = registry_with(&["default"]);

    let standalone = count_view(&registry, None, "home")?;
    assert_eq!(standalone.int()?, 1);
    assert_eq!(backends[0].round_trips(), 1);

    let (first, second) = registry.autoexec(None, None, |pipe| -> Result<_> {
        let first = count_view(&registry, Some(&mut *pipe), "home")?;
        let second = count_view(&registry, Some(&mut *pipe), "home")?;
        assert!(!first.is_ready());
        Ok((first, second))
    })?;

    assert_eq!(first.int()?, 2);
    assert_eq!(second.int()?, 3);
    assert_eq!(backends[0].round_trips(), 2);
    Ok(())
}

#[test]
fn rebinding_a_name_to_another_pool_is_rejected() {
    let (registry, backends) = registry_with(&["default"]);

    registry.connect(backends[0].clone(), None).expect("same pool rebinds");
    let err = registry.connect(MemoryConnector::new(), None).unwrap_err();
    assert!(matches!(err, PipeError::AlreadyConnected(name) if name == "default"));

    let shared = backends[0].clone();
    assert_eq!(kvpipe::Connector::pool_id(&shared), kvpipe::Connector::pool_id(&backends[0]));
    assert_ne!(PoolId::of(&Arc::new(1)), kvpipe::Connector::pool_id(&shared));
}

#[test]
fn failing_scope_applies_nothing() {
    let (registry, backends) = registry_with(&["default"]);
    let mut captured = Vec::new();

    let outcome: Result<()> = registry.autoexec(None, None, |pipe| {
        captured.push(pipe.set("a", "1"));
        captured.push(count_view(&registry, Some(&mut *pipe), "home")?);
        anyhow::bail!("validation failed")
    });

    assert_eq!(outcome.unwrap_err().to_string(), "validation failed");
    for future in &captured {
        assert!(matches!(future.result(), Err(PipeError::ResultNotReady)));
    }
    assert_eq!(backends[0].round_trips(), 0);
    assert_eq!(backends[0].peek(b"a"), None);
}

#[test]
fn coordinator_batches_each_connection_once() -> Result<()> {
    let (registry, backends) = registry_with(&["default", "users"]);

    let (views, profile) = registry.autoexec(None, None, |pipe| -> Result<_> {
        let views = count_view(&registry, Some(&mut *pipe), "profile")?;
        let profile = save_profile(&registry, Some(&mut *pipe), 7, "ada")?;
        save_profile(&registry, Some(&mut *pipe), 8, "grace")?;
        Ok((views, profile))
    })?;

    assert_eq!(views.int()?, 1);
    let fields: Vec<String> = profile.items()?.map(ToString::to_string).collect();
    assert_eq!(fields, vec!["name", "ada"]);
    assert_eq!(backends[0].round_trips(), 1);
    assert_eq!(backends[1].round_trips(), 1);
    Ok(())
}

#[test]
fn one_failing_connection_leaves_the_other_resolved() {
    let (registry, backends) = registry_with(&["default", "a", "b"]);
    let mut coordinator = Coordinator::new(&registry, None);

    let on_a = nested_autoexec(&mut coordinator, Some("a"), |pipe| Ok::<_, PipeError>(pipe.incr("n"))).unwrap();
    let on_b = nested_autoexec(&mut coordinator, Some("b"), |pipe| Ok::<_, PipeError>(pipe.incr("n"))).unwrap();

    backends[2].fail_next("b is down");
    let err = coordinator.execute().unwrap_err();
    assert!(matches!(err, PipeError::Backend(_)));

    assert_eq!(on_a.int().unwrap(), 1);
    assert!(matches!(on_b.result(), Err(PipeError::ResultNotReady)));
    assert_eq!(backends[1].peek(b"n"), Some(b"1".to_vec()));
}

#[test]
fn scoped_helpers_on_a_healthy_connection_resolve_when_another_fails() {
    let (registry, backends) = registry_with(&["default", "users"]);
    let mut views = None;
    let mut profile = None;

    backends[1].fail_next("users unavailable");
    let err = registry
        .autoexec(None, None, |pipe| -> PipeResult<()> {
            views = Some(count_view(&registry, Some(&mut *pipe), "profile")?);
            profile = Some(save_profile(&registry, Some(&mut *pipe), 7, "ada")?);
            Ok(())
        })
        .unwrap_err();

    assert_eq!(err.to_string(), "backend error: users unavailable");
    assert_eq!(views.expect("views recorded").int().unwrap(), 1);
    assert!(matches!(profile.expect("profile recorded").result(), Err(PipeError::ResultNotReady)));
    assert_eq!(backends[0].peek(b"views:profile"), Some(b"1".to_vec()));
}

#[test]
fn callbacks_derive_values_from_resolved_futures() -> Result<()> {
    let (registry, _backends) = registry_with(&["default"]);
    let total: Future<i64> = Future::new();

    let derived = total.clone();
    registry.autoexec(None, None, |pipe| -> PipeResult<()> {
        let a = pipe.incrby("a", 3);
        let b = pipe.incrby("b", 4);
        pipe.then(move || derived.set(a.int()? + b.int()?));
        Ok(())
    })?;

    assert_eq!(*total.result()?, 7);
    Ok(())
}

#[test]
fn resolved_futures_serialize_to_json() -> Result<()> {
    let (registry, _backends) = registry_with(&["default"]);
    let (count, missing, members) = registry.autoexec(None, None, |pipe| -> PipeResult<_> {
        pipe.sadd("tags", "rust");
        Ok((pipe.incr("n"), pipe.get("nope"), pipe.smembers("tags")))
    })?;

    assert_eq!(count.to_json()?, "1");
    assert_eq!(missing.to_json()?, "null");
    assert_eq!(serde_json::to_string(&members)?, r#"["rust"]"#);
    Ok(())
}
