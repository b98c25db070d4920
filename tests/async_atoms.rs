use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use assert_call::{call, CallRecorder};
use futures::{channel::oneshot, FutureExt};
use protium::{command, command_async, computed_async, state, Store, StoreError};
use rt_local::{runtime::core::test, spawn_local, wait_for_idle};

#[test]
async fn get_future_resolves() {
    let store = Store::new();
    let a = state(2);
    let c = {
        let a = a.clone();
        computed_async(move |cx| {
            let a = a.clone();
            async move { Ok(cx.get(&a)? * 2) }
        })
    };
    assert_eq!(store.get_future(&c).await, Ok(4));
}

#[test]
async fn get_opt_is_a_snapshot() {
    let store = Store::new();
    let a = state(2);
    let c = {
        let a = a.clone();
        computed_async(move |cx| {
            let a = a.clone();
            async move { Ok(cx.get(&a)? * 2) }
        })
    };

    assert_eq!(store.get_opt(&c), None);
    store.get_future(&c).await.unwrap();
    assert_eq!(store.get_opt(&c), Some(4));

    // a stale cache is not exposed
    store.set(&a, 3).unwrap();
    assert_eq!(store.get_opt(&c), None);
    assert_eq!(store.get_future(&c).await, Ok(6));
    assert_eq!(store.get_opt(&c), Some(6));
}

#[test]
async fn concurrent_reads_share_one_invocation() {
    let store = Store::new();
    let runs = Rc::new(Cell::new(0));
    let (tx, rx) = oneshot::channel::<i32>();
    let rx = rx.shared();
    let c = {
        let runs = runs.clone();
        computed_async(move |_cx| {
            runs.set(runs.get() + 1);
            let rx = rx.clone();
            async move { Ok(rx.await.unwrap_or(0)) }
        })
    };

    let r1 = Rc::new(RefCell::new(None));
    let r2 = Rc::new(RefCell::new(None));
    let _t1 = spawn_local({
        let (f, r1) = (store.get_future(&c), r1.clone());
        async move { *r1.borrow_mut() = Some(f.await) }
    });
    let _t2 = spawn_local({
        let (f, r2) = (store.get_future(&c), r2.clone());
        async move { *r2.borrow_mut() = Some(f.await) }
    });
    wait_for_idle().await;

    tx.send(7).unwrap();
    wait_for_idle().await;
    assert_eq!(*r1.borrow(), Some(Ok(7)));
    assert_eq!(*r2.borrow(), Some(Ok(7)));
    assert_eq!(runs.get(), 1);
}

#[test]
async fn dependency_change_supersedes_invocation() {
    let store = Store::new();
    let a = state(1);
    let (tx, rx) = oneshot::channel::<()>();
    let rx = rx.shared();
    let c = {
        let a = a.clone();
        computed_async(move |cx| {
            let a = a.clone();
            let rx = rx.clone();
            async move {
                let v = cx.get(&a)?;
                rx.await.ok();
                cx.get(&a)?;
                Ok(v)
            }
        })
    };

    let r1 = Rc::new(RefCell::new(None));
    let _t1 = spawn_local({
        let (f, r1) = (store.get_future(&c), r1.clone());
        async move { *r1.borrow_mut() = Some(f.await) }
    });
    wait_for_idle().await;

    // invalidating a recorded dependency aborts the in-flight invocation
    store.set(&a, 2).unwrap();
    wait_for_idle().await;
    assert_eq!(*r1.borrow(), Some(Err(StoreError::Aborted)));
    assert_eq!(store.get_opt(&c), None);

    tx.send(()).unwrap();
    assert_eq!(store.get_future(&c).await, Ok(2));
}

#[test]
async fn settled_async_value_notifies_subscribers() {
    let store = Store::new();
    let mut cr = CallRecorder::new();
    let a = state(1);
    let c = {
        let a = a.clone();
        computed_async(move |cx| {
            let a = a.clone();
            async move { Ok(cx.get(&a)? * 10) }
        })
    };
    let l = command(|_, ()| {
        call!("l");
        Ok(())
    });
    let _s = store.sub(&c, &l);

    assert_eq!(store.get_future(&c).await, Ok(10));
    cr.verify("l");
    assert_eq!(store.get_opt(&c), Some(10));
}

#[test]
async fn async_errors_propagate_and_are_not_cached() {
    let store = Store::new();
    let fail = Rc::new(Cell::new(true));
    let c = {
        let fail = fail.clone();
        computed_async(move |_cx| {
            let fail = fail.get();
            async move {
                if fail {
                    Err(StoreError::Unreadable)
                } else {
                    Ok(1)
                }
            }
        })
    };

    assert_eq!(store.get_future(&c).await, Err(StoreError::Unreadable));
    assert_eq!(store.get_opt(&c), None);

    fail.set(false);
    assert_eq!(store.get_future(&c).await, Ok(1));
}

#[test]
async fn sync_prefix_of_async_command_runs_eagerly() {
    let store = Store::new();
    let a = state(0);
    let cmd = {
        let a = a.clone();
        command_async(move |cx, n: i32| {
            let a = a.clone();
            async move {
                cx.set(&a, n)?;
                Ok(n * 2)
            }
        })
    };

    let fut = store.run_future(&cmd, 5);
    // the write ran before run_future returned
    assert_eq!(store.get(&a), Ok(5));
    assert_eq!(fut.await, Ok(10));
}

#[test]
async fn async_command_flushes_per_write_cluster() {
    let store = Store::new();
    let mut cr = CallRecorder::new();
    let s1 = state(0);
    let s2 = state(0);
    let s3 = state(0);
    let s4 = state(0);
    let l = command(|_, ()| {
        call!("l");
        Ok(())
    });
    let _s = store.sub_many(
        [(&s1).into(), (&s2).into(), (&s3).into(), (&s4).into()],
        &l,
    );

    let (tx, rx) = oneshot::channel::<()>();
    let rx = rx.shared();
    let cmd = {
        let (s1, s2, s3, s4) = (s1.clone(), s2.clone(), s3.clone(), s4.clone());
        command_async(move |cx, ()| {
            let (s1, s2, s3, s4) = (s1.clone(), s2.clone(), s3.clone(), s4.clone());
            let rx = rx.clone();
            async move {
                cx.set(&s1, 1)?;
                cx.set(&s2, 1)?;
                rx.await.ok();
                cx.set(&s3, 1)?;
                cx.set(&s4, 1)?;
                Ok(())
            }
        })
    };

    let fut = store.run_future(&cmd, ());
    // the writes before the first suspension have already notified
    cr.verify(["l", "l"]);

    let done = Rc::new(RefCell::new(None));
    let _t = spawn_local({
        let done = done.clone();
        async move { *done.borrow_mut() = Some(fut.await) }
    });
    wait_for_idle().await;
    tx.send(()).unwrap();
    wait_for_idle().await;
    assert_eq!(*done.borrow(), Some(Ok(())));
    cr.verify(["l", "l"]);
}

#[test]
async fn repeated_writes_to_one_atom_notify_per_write() {
    let store = Store::new();
    let mut cr = CallRecorder::new();
    let base = state(0);
    let l = {
        let (store, base) = (store.clone(), base.clone());
        command(move |_, ()| {
            call!("{}", store.get(&base)?);
            Ok(())
        })
    };
    let _s = store.sub(&base, &l);

    let (tx, rx) = oneshot::channel::<()>();
    let rx = rx.shared();
    let cmd = {
        let base = base.clone();
        command_async(move |cx, ()| {
            let base = base.clone();
            let rx = rx.clone();
            async move {
                cx.set(&base, 1)?;
                cx.set(&base, 2)?;
                rx.await.ok();
                cx.set(&base, 3)?;
                cx.set(&base, 4)?;
                Ok(())
            }
        })
    };

    let fut = store.run_future(&cmd, ());
    // two deliveries synchronously, one per write
    cr.verify(["1", "2"]);

    let done = Rc::new(RefCell::new(None));
    let _t = spawn_local({
        let done = done.clone();
        async move { *done.borrow_mut() = Some(fut.await) }
    });
    wait_for_idle().await;
    tx.send(()).unwrap();
    wait_for_idle().await;
    assert_eq!(*done.borrow(), Some(Ok(())));
    cr.verify(["3", "4"]);
}
