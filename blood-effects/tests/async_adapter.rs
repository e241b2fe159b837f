//! Integration tests for the async adapter, cancellation scopes and the
//! channel-forwarding handler.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use blood_effects::async_io::{
    self, async_read_file, async_sleep, async_write_file, deliver_completion, ASYNC, AWAIT_REQUEST,
    GET_LOOP, REGISTER_REQUEST,
};
use blood_effects::channel::action;
use blood_effects::{
    async_handler, await_request, cancel_within, drive, install, interleave, outstanding_requests,
    perform, stats, with_cancel_scope, Effect, EventLoop, FatalKind, HandlerDef, IoOp, LoopHandle,
    OpKind, ReactorConfig, RequestId, Resumption, Scope, Value,
};
use common::{expect_fatal_kind, isolated};

fn fast_loop() -> LoopHandle {
    EventLoop::new(ReactorConfig {
        poll_timeout: Duration::from_millis(5),
        ..ReactorConfig::default()
    })
}

#[test]
fn request_scope_is_within_enclosing_scopes_only() {
    isolated(|| {
        let lp = fast_loop();
        let scopes: Rc<RefCell<Option<(Scope, Scope)>>> = Rc::new(RefCell::new(None));
        let status = Rc::new(Cell::new(None));

        let (store, seen, loop_ref) = (scopes.clone(), status.clone(), lp.clone());
        let out = drive(async_handler(&lp, move || async move {
            let sibling_slot = Rc::new(RefCell::new(None));
            let slot = sibling_slot.clone();
            with_cancel_scope(move |s| async move {
                *slot.borrow_mut() = Some(s);
                Ok(Value::Null)
            })
            .await?;
            let sibling = sibling_slot.borrow_mut().take();
            with_cancel_scope(move |a| async move {
                with_cancel_scope(move |b| async move {
                    assert!(b.is_within(&a));
                    if let Some(sibling) = sibling {
                        *store.borrow_mut() = Some((a, sibling));
                    }
                    let req = async_io::submit(&loop_ref, IoOp::Manual)?;
                    seen.set(Some(await_request(&loop_ref, req).await));
                    Ok(Value::Null)
                })
                .await
            })
            .await
        }));
        assert_eq!(out, Ok(Value::Null));
        assert_eq!(outstanding_requests(), 1);

        let (a, sibling) = scopes.borrow_mut().take().unwrap();
        assert_eq!(cancel_within(Some(&sibling)), 0);
        assert_eq!(cancel_within(Some(&a)), 1);
        lp.run().unwrap();

        assert_eq!(status.get(), Some(-nix::libc::ECANCELED));
        assert_eq!(outstanding_requests(), 0);
        lp.close().unwrap();
        assert_eq!(blood_effects::handles::live(), 0);
    });
}

#[test]
fn duplicate_completion_is_a_noop() {
    isolated(|| {
        let lp = fast_loop();
        let resumed = Rc::new(Cell::new(0));
        let request = Rc::new(Cell::new(None));

        let (count, id, loop_ref) = (resumed.clone(), request.clone(), lp.clone());
        let out = drive(async_handler(&lp, move || async move {
            let req = async_io::submit(&loop_ref, IoOp::Manual)?;
            id.set(Some(req));
            let status = await_request(&loop_ref, req).await;
            count.set(count.get() + 1);
            Ok(Value::Int(status.into()))
        }));
        assert_eq!(out, Ok(Value::Null));

        let req: RequestId = request.get().unwrap();
        lp.complete(req, 7).unwrap();
        lp.run().unwrap();
        assert_eq!(resumed.get(), 1);

        let duplicates = stats().duplicate_completions;
        deliver_completion(&lp, req, 9);
        assert_eq!(resumed.get(), 1);
        assert_eq!(outstanding_requests(), 0);
        assert_eq!(stats().duplicate_completions, duplicates + 1);
        lp.close().unwrap();
    });
}

#[test]
fn timers_resume_in_deadline_order() {
    isolated(|| {
        let lp = fast_loop();
        let order = Rc::new(RefCell::new(Vec::new()));
        let log = order.clone();
        let out = drive(async_handler(&lp, move || async move {
            let actions = [(0, 30u64), (1, 1), (2, 10)]
                .into_iter()
                .map(|(index, ms)| {
                    let log = log.clone();
                    action(move || async move {
                        async_sleep(Duration::from_millis(ms)).await?;
                        log.borrow_mut().push(index);
                        Ok(Value::Null)
                    })
                })
                .collect();
            interleave(actions).await
        }));
        assert_eq!(out, Ok(Value::Null));
        lp.run().unwrap();
        assert_eq!(*order.borrow(), vec![1, 2, 0]);
        assert_eq!(outstanding_requests(), 0);
        lp.close().unwrap();
    });
}

#[test]
fn interleave_resumes_in_completion_order() {
    isolated(|| {
        let lp = fast_loop();
        let requests = Rc::new(RefCell::new(Vec::new()));
        let order = Rc::new(RefCell::new(Vec::new()));
        let total = Rc::new(Cell::new(None));

        let (reqs, log, result) = (requests.clone(), order.clone(), total.clone());
        let out = drive(async_handler(&lp, move || async move {
            let actions = (0..2)
                .map(|index| {
                    let (reqs, log) = (reqs.clone(), log.clone());
                    action(move || async move {
                        let lp = async_io::async_loop().await;
                        let req = async_io::submit(&lp, IoOp::Manual)?;
                        reqs.borrow_mut().push(req);
                        let status = await_request(&lp, req).await;
                        log.borrow_mut().push((index, status));
                        Ok(Value::Null)
                    })
                })
                .collect();
            let n = interleave(actions).await?;
            result.set(n.as_int());
            Ok(Value::Null)
        }));
        assert_eq!(out, Ok(Value::Null));
        assert_eq!(requests.borrow().len(), 2);
        // Both actions plus the consumer are parked.
        assert_eq!(outstanding_requests(), 3);

        let (first, second) = (requests.borrow()[0], requests.borrow()[1]);
        lp.complete(second, 11).unwrap();
        lp.complete(first, 10).unwrap();
        lp.run().unwrap();

        assert_eq!(*order.borrow(), vec![(1, 11), (0, 10)]);
        assert_eq!(total.get(), Some(2));
        assert_eq!(outstanding_requests(), 0);
        lp.close().unwrap();
    });
}

#[test]
fn interleave_rethrows_first_failure_after_all_finish() {
    isolated(|| {
        let lp = fast_loop();
        let finished = Rc::new(Cell::new(0));
        let outcome = Rc::new(RefCell::new(None));

        let (done, result) = (finished.clone(), outcome.clone());
        let _ = drive(async_handler(&lp, move || async move {
            let failing = {
                let done = done.clone();
                action(move || async move {
                    async_sleep(Duration::from_millis(1)).await?;
                    done.set(done.get() + 1);
                    Err(blood_effects::Exception::new(-5, "first"))
                })
            };
            let slow = {
                let done = done.clone();
                action(move || async move {
                    async_sleep(Duration::from_millis(5)).await?;
                    done.set(done.get() + 1);
                    Ok(Value::Null)
                })
            };
            let outcome = interleave(vec![failing, slow]).await;
            *result.borrow_mut() = Some(outcome);
            Ok(Value::Null)
        }));
        lp.run().unwrap();

        assert_eq!(finished.get(), 2);
        let err = outcome.borrow_mut().take().unwrap().unwrap_err();
        assert_eq!(err.code, -5);
        assert_eq!(outstanding_requests(), 0);
        lp.close().unwrap();
    });
}

#[test]
fn file_round_trip_through_the_loop() {
    isolated(|| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let lp = fast_loop();
        let read_back = Rc::new(RefCell::new(None));

        let (target, slot) = (path.clone(), read_back.clone());
        let _ = drive(async_handler(&lp, move || async move {
            let written = async_write_file(target.clone(), b"effects".to_vec()).await?;
            let data = async_read_file(target).await?;
            *slot.borrow_mut() = Some((written, data));
            Ok(Value::Null)
        }));
        lp.run().unwrap();

        let (written, data) = read_back.borrow_mut().take().unwrap();
        assert_eq!(written, 7);
        assert_eq!(data, b"effects");
        lp.close().unwrap();
    });
}

#[test]
fn missing_file_raises_exception() {
    isolated(|| {
        let dir = tempfile::tempdir().unwrap();
        let lp = fast_loop();
        let code = Rc::new(Cell::new(0));

        let (missing, seen) = (dir.path().join("absent"), code.clone());
        let _ = drive(async_handler(&lp, move || async move {
            if let Err(exn) = async_read_file(missing).await {
                seen.set(exn.code);
            }
            Ok(Value::Null)
        }));
        lp.run().unwrap();
        assert_eq!(code.get(), -nix::libc::ENOENT);
        lp.close().unwrap();
    });
}

#[test]
fn releasing_handler_with_outstanding_request_is_fatal() {
    expect_fatal_kind(FatalKind::InvalidArgument, || {
        // Forwards registration but discards the computation instead of
        // parking it, leaving the request linked.
        let dropping = HandlerDef::builder(Effect::of(&ASYNC))
            .op(OpKind::Tail, GET_LOOP, |r: Resumption, local: Value, _| async move {
                let lp = perform(GET_LOOP, Value::Null).await;
                r.resume_tail(local, lp)
            })
            .op(OpKind::Tail, REGISTER_REQUEST, |r: Resumption, local: Value, arg: Value| async move {
                perform(REGISTER_REQUEST, arg).await;
                r.resume_tail(local, Value::Null)
            })
            .op_sync(OpKind::NoResume, AWAIT_REQUEST, |_, _, _| Ok(Value::Null))
            .build();
        let lp = fast_loop();
        let loop_ref = lp.clone();
        let _ = drive(async_handler(&lp, move || {
            install(
                &dropping,
                Value::Null,
                move |_| async move {
                    let req = async_io::submit(&loop_ref, IoOp::Manual)?;
                    await_request(&loop_ref, req).await;
                    Ok(Value::Null)
                },
                Value::Null,
            )
        }));
    });
}
