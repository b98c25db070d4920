use assert_call::{call, CallRecorder};
use protium::{command, computed, state, Store, StoreError};

#[test]
fn notification_order_is_upstream_first() {
    let store = Store::new();
    let mut cr = CallRecorder::new();
    let a = state(1);
    let c = {
        let a = a.clone();
        computed(move |cx| Ok(cx.get(&a)? + 1))
    };
    let la = command(|_, ()| {
        call!("a");
        Ok(())
    });
    let lc = command(|_, ()| {
        call!("c");
        Ok(())
    });
    let _s1 = store.sub(&a, &la);
    let _s2 = store.sub(&c, &lc);

    store.set(&a, 2).unwrap();
    cr.verify(["a", "c"]);
}

#[test]
fn diamond_notifies_upstream_before_downstream() {
    let store = Store::new();
    let mut cr = CallRecorder::new();
    let a = state(1);
    let c1 = {
        let a = a.clone();
        computed(move |cx| Ok(cx.get(&a)? + 1))
    };
    let c2 = {
        let a = a.clone();
        computed(move |cx| Ok(cx.get(&a)? * 10))
    };
    let top = {
        let (c1, c2) = (c1.clone(), c2.clone());
        computed(move |cx| Ok(cx.get(&c1)? + cx.get(&c2)?))
    };
    let l_c2 = command(|_, ()| {
        call!("c2");
        Ok(())
    });
    let l_top = command(|_, ()| {
        call!("top");
        Ok(())
    });
    let _s1 = store.sub(&c2, &l_c2);
    let _s2 = store.sub(&top, &l_top);

    // top is reached through c1 first, but it still runs after c2
    store.set(&a, 2).unwrap();
    cr.verify(["c2", "top"]);
}

#[test]
fn deep_chain_notifies_once_per_write() {
    let store = Store::new();
    let mut cr = CallRecorder::new();
    let a = state(1);
    let c1 = {
        let a = a.clone();
        computed(move |cx| Ok(cx.get(&a)? * 2))
    };
    let c2 = {
        let c1 = c1.clone();
        computed(move |cx| Ok(cx.get(&c1)? + 1))
    };
    let l = {
        let (store, c2) = (store.clone(), c2.clone());
        command(move |_, ()| {
            call!("{}", store.get(&c2)?);
            Ok(())
        })
    };
    let _s = store.sub(&c2, &l);

    store.set(&a, 2).unwrap();
    cr.verify("5");
    store.set(&a, 3).unwrap();
    cr.verify("7");
}

#[test]
fn unobserved_branches_stay_silent() {
    let store = Store::new();
    let mut cr = CallRecorder::new();
    let a = state(1);
    let b = state(1);
    let watched = {
        let a = a.clone();
        computed(move |cx| cx.get(&a))
    };
    let _ignored = {
        let b = b.clone();
        computed(move |cx| cx.get(&b))
    };
    let l = command(|_, ()| {
        call!("l");
        Ok(())
    });
    let _s = store.sub(&watched, &l);

    store.set(&b, 2).unwrap();
    cr.verify(());
    store.set(&a, 2).unwrap();
    cr.verify("l");
}

#[test]
fn failed_command_keeps_prior_writes() {
    let store = Store::new();
    let a = state(0);
    let inner: protium::Command<(), ()> = command(|_, ()| Err(StoreError::Unreadable));
    let outer = {
        let (a, inner) = (a.clone(), inner.clone());
        command(move |cx, ()| {
            cx.set(&a, 1)?;
            cx.run(&inner, ())?;
            cx.set(&a, 2)?;
            Ok(())
        })
    };

    assert_eq!(store.run(&outer, ()), Err(StoreError::Unreadable));
    // no rollback: the first write stands
    assert_eq!(store.get(&a), Ok(1));
}

#[test]
fn nested_commands_notify_as_they_write() {
    let store = Store::new();
    let mut cr = CallRecorder::new();
    let a = state(0);
    let b = state(0);
    let l = command(|_, ()| {
        call!("l");
        Ok(())
    });
    let _s1 = store.sub(&a, &l);
    let _s2 = store.sub(&b, &l);

    let inner = {
        let b = b.clone();
        command(move |cx, ()| cx.set(&b, 1))
    };
    let outer = {
        let (a, inner) = (a.clone(), inner.clone());
        command(move |cx, ()| {
            cx.set(&a, 1)?;
            cx.run(&inner, ())
        })
    };

    store.run(&outer, ()).unwrap();
    cr.verify(["l", "l"]);
}

#[test]
fn values_remain_readable_after_unsubscribe() {
    let store = Store::new();
    let a = state(1);
    let c = {
        let a = a.clone();
        computed(move |cx| Ok(cx.get(&a)? * 2))
    };
    let l = command(|_, ()| Ok(()));
    let s = store.sub(&c, &l);
    drop(s);

    store.set(&a, 5).unwrap();
    assert_eq!(store.get(&c), Ok(10));
}
