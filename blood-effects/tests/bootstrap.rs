//! Whole-program runs through the bootstrap.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use blood_effects::async_io::{async_read_file, async_sleep, async_write_file};
use blood_effects::channel::action;
use blood_effects::{
    async_main_with, current_scope, interleave, with_cancel_scope, Exception, LogLevel,
    RuntimeConfig, Value,
};
use common::isolated;

fn quiet() -> RuntimeConfig {
    RuntimeConfig::builder()
        .log_level(LogLevel::Off)
        .poll_timeout(Duration::from_millis(5))
        .build()
        .unwrap()
}

#[test]
fn program_with_concurrent_sleeps_shuts_down_clean() {
    let (order, report) = isolated(|| {
        let order = Rc::new(RefCell::new(Vec::new()));
        let log = order.clone();
        let report = async_main_with(&quiet(), move || async move {
            let actions = [(0, 8u64), (1, 2)]
                .into_iter()
                .map(|(index, ms)| {
                    let log = log.clone();
                    action(move || async move {
                        with_cancel_scope(move |_| async move {
                            async_sleep(Duration::from_millis(ms)).await?;
                            log.borrow_mut().push(index);
                            Ok(Value::Null)
                        })
                        .await
                    })
                })
                .collect();
            interleave(actions).await
        })
        .unwrap();
        let order = order.borrow().clone();
        (order, report)
    });
    assert_eq!(order, vec![1, 0]);
    assert!(report.is_clean(), "{report:?}");
}

#[test]
fn uncaught_failure_does_not_stop_the_loop() {
    let (reached, report) = isolated(|| {
        let reached = Rc::new(Cell::new(false));
        let flag = reached.clone();
        let report = async_main_with(&quiet(), move || async move {
            async_sleep(Duration::from_millis(1)).await?;
            flag.set(true);
            Err(Exception::new(-1, "late failure"))
        })
        .unwrap();
        (reached.get(), report)
    });
    assert!(reached);
    assert!(report.is_clean(), "{report:?}");
}

#[test]
fn scopes_nest_under_the_root() {
    let depths = isolated(|| {
        let depths = Rc::new(RefCell::new(Vec::new()));
        let log = depths.clone();
        async_main_with(&quiet(), move || async move {
            log.borrow_mut().push(current_scope().await.map_or(0, |s| s.depth()));
            with_cancel_scope(move |outer| async move {
                with_cancel_scope(move |inner| async move {
                    async_sleep(Duration::from_millis(1)).await?;
                    let current = current_scope().await;
                    log.borrow_mut().push(outer.depth());
                    log.borrow_mut().push(current.map_or(0, |s| s.depth()));
                    assert_eq!(inner.parent(), Some(&outer));
                    Ok(Value::Null)
                })
                .await
            })
            .await
        })
        .unwrap();
        let depths = depths.borrow().clone();
        depths
    });
    assert_eq!(depths, vec![0, 1, 2]);
}

#[test]
fn files_written_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.txt");
    let text = isolated(move || {
        let read = Rc::new(RefCell::new(String::new()));
        let slot = read.clone();
        let report = async_main_with(&quiet(), move || async move {
            async_write_file(path.clone(), b"hello from the loop".to_vec()).await?;
            let data = async_read_file(path).await?;
            *slot.borrow_mut() = String::from_utf8_lossy(&data).into_owned();
            Ok(Value::Null)
        })
        .unwrap();
        assert!(report.is_clean(), "{report:?}");
        let text = read.borrow().clone();
        text
    });
    assert_eq!(text, "hello from the loop");
}
