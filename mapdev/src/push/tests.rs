//! End-to-end tests of the interrupt-delivery pipeline against the
//! shared-memory dummy transport.

use crate::device::Device;
use crate::error::Error;
use crate::transport::mock::Mock;
use crate::types::{AccessFlags, DataValidity, VersionNumber, Void};
use mapdev_utils::mapfile;
use std::sync::Arc;

fn device(map: &str) -> Device<Mock> {
    let (catalogue, metadata) = mapfile::parse_str("test.map", map).unwrap();
    let transport = Mock::new(&catalogue);
    Device::with_catalogue(transport, catalogue, metadata).unwrap()
}

fn push() -> AccessFlags {
    AccessFlags::wait_for_new_data()
}

const FAN_OUT_MAP: &str = "\
@INTERRUPT_HANDLER 0 {\"name\":\"AXI4_INTC\"}
DATA 1 0 4 0 32 0 1 INTERRUPT0:5
TICK 0 0 0 0 0 0 0 INTERRUPT0:6
PLAIN 1 4 4 0
";

#[test]
fn test_fan_out_two_subscribers() {
    let dev = device(FAN_OUT_MAP);
    dev.open().unwrap();
    dev.activate_async_read().unwrap();

    let mut a = dev.subscribe::<i32>("DATA", 0, 0, push()).unwrap();
    let mut b = dev.subscribe::<i32>("DATA", 0, 0, push()).unwrap();
    a.read().unwrap();
    b.read().unwrap();

    let mut versions = Vec::new();
    for value in [7, 8, 9] {
        dev.transport().lock().unwrap().poke(0, 0, &[value]);
        dev.dispatch_interrupt(0).unwrap();
        a.read().unwrap();
        b.read().unwrap();
        assert_eq!(*a.get(), value);
        assert_eq!(*b.get(), value);
        // subscribers of one distributor see identical versions per trigger
        assert_eq!(a.version(), b.version());
        versions.push(a.version());
    }
    assert!(versions.windows(2).all(|w| w[0] < w[1]));
    // exactly three values, no duplicates
    assert!(!a.try_read().unwrap());
    assert!(!b.try_read().unwrap());
}

#[test]
fn test_initial_value_on_subscribe_while_active() {
    let dev = device(FAN_OUT_MAP);
    dev.open().unwrap();
    dev.transport().lock().unwrap().poke(0, 0, &[21]);
    dev.activate_async_read().unwrap();

    let mut a = dev.subscribe::<i32>("DATA", 0, 0, push()).unwrap();
    a.read().unwrap();
    assert_eq!(*a.get(), 21);
}

#[test]
fn test_early_event_before_activate() {
    let dev = device(FAN_OUT_MAP);
    dev.open().unwrap();
    let mut a = dev.subscribe::<i32>("DATA", 0, 0, push()).unwrap();

    dev.transport().lock().unwrap().poke(0, 0, &[42]);
    dev.dispatch_interrupt(0).unwrap();
    // domain is inactive, the event is parked
    assert!(!a.try_read().unwrap());

    dev.activate_async_read().unwrap();
    a.read().unwrap();
    assert_eq!(*a.get(), 42);
    // no duplicate from the parked event
    assert!(!a.try_read().unwrap());
}

#[test]
fn test_activate_forwards_newer_pending_version() {
    let dev = device(FAN_OUT_MAP);
    dev.open().unwrap();
    let mut a = dev.subscribe::<i32>("DATA", 0, 0, push()).unwrap();
    let domain = dev.shared().domain_for(0);

    let stale = VersionNumber::new();
    dev.dispatch_interrupt(0).unwrap();
    domain.activate(stale);

    a.read().unwrap();
    assert!(a.version() > stale);
}

#[test]
fn test_distributor_lifetime_follows_subscribers() {
    let dev = device(FAN_OUT_MAP);
    dev.open().unwrap();
    let a = dev.subscribe::<i32>("DATA", 0, 0, push()).unwrap();
    let b = dev.subscribe::<i32>("DATA", 0, 0, push()).unwrap();

    let domain = dev.shared().domain_for(0);
    let d1 = domain.poll_distributor_for(&[0, 5]).unwrap();
    let d2 = domain.poll_distributor_for(&[0, 5]).unwrap();
    assert!(Arc::ptr_eq(&d1, &d2));

    let watch = Arc::downgrade(&d1);
    drop(d1);
    drop(d2);
    assert!(watch.upgrade().is_some(), "subscribers keep it alive");
    drop(a);
    drop(b);
    assert!(watch.upgrade().is_none(), "last unsubscribe tears it down");
}

#[test]
fn test_void_variable_distribution() {
    let dev = device(FAN_OUT_MAP);
    dev.open().unwrap();
    dev.activate_async_read().unwrap();

    let mut tick = dev.subscribe::<Void>("TICK", 0, 0, push()).unwrap();
    tick.read().unwrap();
    let first = tick.version();

    dev.dispatch_interrupt(0).unwrap();
    tick.read().unwrap();
    assert!(tick.version() > first);
}

#[test]
fn test_subscribe_requires_interrupt_register() {
    let dev = device(FAN_OUT_MAP);
    dev.open().unwrap();
    assert!(matches!(
        dev.subscribe::<i32>("PLAIN", 0, 0, push()),
        Err(Error::Logic(_))
    ));
}

#[test]
fn test_unknown_interrupt_line() {
    let dev = device(FAN_OUT_MAP);
    dev.open().unwrap();
    assert!(matches!(dev.dispatch_interrupt(9), Err(Error::Runtime(_))));
}

#[test]
fn test_interrupt_unblocks_pending_read() {
    let dev = device(FAN_OUT_MAP);
    dev.open().unwrap();
    dev.activate_async_read().unwrap();
    let mut a = dev.subscribe::<i32>("DATA", 0, 0, push()).unwrap();
    a.read().unwrap();

    let interrupter = a.interrupter();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        interrupter.interrupt();
    });
    assert_eq!(a.read(), Err(Error::Interrupted));
    handle.join().unwrap();

    // the queue is intact afterwards
    dev.transport().lock().unwrap().poke(0, 0, &[3]);
    dev.dispatch_interrupt(0).unwrap();
    a.read().unwrap();
    assert_eq!(*a.get(), 3);
}

#[test]
fn test_exception_fan_out_and_recovery() {
    let dev = device(FAN_OUT_MAP);
    dev.open().unwrap();
    dev.activate_async_read().unwrap();
    let mut a = dev.subscribe::<i32>("DATA", 0, 0, push()).unwrap();
    a.read().unwrap();
    let last_good = a.version();

    dev.transport().lock().unwrap().set_broken(true);
    dev.dispatch_interrupt(0).unwrap();

    // exactly one runtime error arrives, the cached value turns faulty
    assert!(matches!(a.read(), Err(Error::Runtime(_))));
    assert_eq!(a.validity(), DataValidity::Faulty);

    // further triggers in the failed state deliver nothing
    dev.dispatch_interrupt(0).unwrap();
    assert!(!a.try_read().unwrap());

    // a synchronous accessor now reports the pending fault on any transfer
    let mut sync = dev.accessor::<i32>("DATA", 0, 0, AccessFlags::default()).unwrap();
    assert!(matches!(sync.read(), Err(Error::Runtime(_))));

    // transport restored: re-open and re-activate resumes distribution
    dev.transport().lock().unwrap().set_broken(false);
    dev.transport().lock().unwrap().poke(0, 0, &[77]);
    dev.open().unwrap();
    dev.activate_async_read().unwrap();

    a.read().unwrap();
    assert_eq!(*a.get(), 77);
    assert_eq!(a.validity(), DataValidity::Ok);
    assert!(a.version() > last_good);
}

#[test]
fn test_double_fault_is_reported_once() {
    let dev = device(FAN_OUT_MAP);
    dev.open().unwrap();
    dev.activate_async_read().unwrap();
    let mut a = dev.subscribe::<i32>("DATA", 0, 0, push()).unwrap();
    a.read().unwrap();

    dev.transport().lock().unwrap().set_broken(true);
    let mut sync = dev.accessor::<i32>("DATA", 0, 0, AccessFlags::default()).unwrap();
    assert!(sync.read().is_err());
    assert!(sync.read().is_err());
    dev.set_exception("a second report of the same episode");

    assert!(matches!(a.read(), Err(Error::Runtime(_))));
    assert!(!a.try_read().unwrap());
}

const DUMMY_INTC_MAP: &str = "\
@INTERRUPT_HANDLER 2 {\"name\":\"dummy\",\"module\":\"INTC\"}
INTC.active_ints 1 0x100 4 0 32 0 0 RO
DATA5 1 0 4 0 32 0 1 INTERRUPT2:5
DATA6 1 4 4 0 32 0 1 INTERRUPT2:6
";

#[test]
fn test_dummy_controller_fires_asserted_lines() {
    let dev = device(DUMMY_INTC_MAP);
    dev.open().unwrap();
    dev.activate_async_read().unwrap();

    let mut five = dev.subscribe::<i32>("DATA5", 0, 0, push()).unwrap();
    let mut six = dev.subscribe::<i32>("DATA6", 0, 0, push()).unwrap();
    five.read().unwrap();
    six.read().unwrap();

    {
        let mut transport = dev.transport().lock().unwrap();
        transport.poke(0, 0, &[11]);
        transport.poke(0, 4, &[22]);
        transport.poke(0, 0x100, &[1 << 5]);
    }
    dev.dispatch_interrupt(2).unwrap();

    five.read().unwrap();
    assert_eq!(*five.get(), 11);
    // line 6 was not asserted
    assert!(!six.try_read().unwrap());
}

#[test]
fn test_dummy_controller_unknown_line_is_a_fault() {
    let dev = device(DUMMY_INTC_MAP);
    dev.open().unwrap();
    dev.activate_async_read().unwrap();
    let mut five = dev.subscribe::<i32>("DATA5", 0, 0, push()).unwrap();
    five.read().unwrap();

    dev.transport().lock().unwrap().poke(0, 0x100, &[1 << 9]);
    dev.dispatch_interrupt(2).unwrap();
    assert!(matches!(five.read(), Err(Error::Runtime(_))));
}

const NESTED_MAP: &str = "\
@INTERRUPT_HANDLER 0 {\"name\":\"AXI4_INTC\"}
@INTERRUPT_HANDLER 0:1 {\"name\":\"AXI4_INTC\"}
DEEP 1 0 4 0 32 0 1 INTERRUPT0:1:2
";

#[test]
fn test_nested_controller_tree() {
    let dev = device(NESTED_MAP);
    dev.open().unwrap();
    dev.activate_async_read().unwrap();

    let mut deep = dev.subscribe::<i32>("DEEP", 0, 0, push()).unwrap();
    deep.read().unwrap();

    dev.transport().lock().unwrap().poke(0, 0, &[123]);
    dev.dispatch_interrupt(0).unwrap();
    deep.read().unwrap();
    assert_eq!(*deep.get(), 123);
}

#[test]
fn test_windowed_subscription() {
    let dev = device(
        "@INTERRUPT_HANDLER 0 {\"name\":\"AXI4_INTC\"}\n\
         ARR 4 0 16 0 16 0 1 INTERRUPT0:5\n",
    );
    dev.open().unwrap();
    dev.activate_async_read().unwrap();

    let mut window = dev.subscribe::<i32>("ARR", 2, 1, push()).unwrap();
    window.read().unwrap();

    dev.transport().lock().unwrap().poke(0, 0, &[10, 20, 30, 40]);
    dev.dispatch_interrupt(0).unwrap();
    window.read().unwrap();
    assert_eq!(window.as_slice(), [20, 30]);
}

#[test]
fn test_2d_subscription() {
    let dev = device(
        "@INTERRUPT_HANDLER 0 {\"name\":\"AXI4_INTC\"}\n\
         AREA_MULTIPLEXED_SEQUENCE_DAQ 4 0x20 16 0 32 0 0 INTERRUPT0:7\n\
         SEQUENCE_DAQ_0 1 0x20 2 0 16 0 0\n\
         SEQUENCE_DAQ_1 1 0x22 2 0 16 0 1\n",
    );
    dev.open().unwrap();
    dev.activate_async_read().unwrap();

    let mut daq = dev.subscribe::<i32>("DAQ", 0, 0, push()).unwrap();
    daq.read().unwrap();

    let words: Vec<i32> = (0..4).map(|b| 0x0001_0000 * b + 7 + b).collect();
    dev.transport().lock().unwrap().poke(0, 0x20, &words);
    dev.dispatch_interrupt(0).unwrap();
    daq.read().unwrap();
    assert_eq!(daq.channel(0), [7, 8, 9, 10]);
    assert_eq!(daq.channel(1), [0, 1, 2, 3]);
}

#[test]
fn test_read_latest_drains_to_newest() {
    let dev = device(FAN_OUT_MAP);
    dev.open().unwrap();
    dev.activate_async_read().unwrap();
    let mut a = dev.subscribe::<i32>("DATA", 0, 0, push()).unwrap();

    for value in [1, 2, 3] {
        dev.transport().lock().unwrap().poke(0, 0, &[value]);
        dev.dispatch_interrupt(0).unwrap();
    }
    assert!(a.read_latest().unwrap());
    assert_eq!(*a.get(), 3);
    assert!(!a.read_latest().unwrap());
}

#[test]
fn test_axi4_master_enable_rearm() {
    let dev = device(
        "@INTERRUPT_HANDLER 0 {\"name\":\"AXI4_INTC\",\"module\":\"INTC\",\"options\":[\"MER\"]}\n\
         INTC.MER 1 0x80 4 0\n\
         DATA 1 0 4 0 32 0 1 INTERRUPT0:5\n",
    );
    dev.open().unwrap();
    let mut a = dev.subscribe::<i32>("DATA", 0, 0, push()).unwrap();
    dev.activate_async_read().unwrap();

    // activation re-arms the controller: master enable + hardware enable
    assert_eq!(dev.transport().lock().unwrap().peek(0, 0x80, 1), [3]);
    a.read().unwrap();

    dev.transport().lock().unwrap().poke(0, 0, &[1]);
    dev.dispatch_interrupt(0).unwrap();
    a.read().unwrap();
    assert_eq!(*a.get(), 1);
}

#[test]
fn test_missing_controller_description() {
    let dev = device("DATA 1 0 4 0 32 0 1 INTERRUPT3:1\n");
    dev.open().unwrap();
    assert!(matches!(
        dev.subscribe::<i32>("DATA", 0, 0, push()),
        Err(Error::Logic(_))
    ));
}

#[test]
fn test_waiter_thread_delivery() {
    let dev = device(FAN_OUT_MAP);
    dev.open().unwrap();
    dev.activate_async_read().unwrap();

    let mut a = dev.subscribe::<i32>("DATA", 0, 0, push()).unwrap();
    a.read().unwrap();

    {
        let mut transport = dev.transport().lock().unwrap();
        transport.poke(0, 0, &[5]);
        transport.fire(0);
    }
    a.read().unwrap();
    assert_eq!(*a.get(), 5);
    dev.close();
    assert!(!dev.is_async_read_active());
}

#[test]
fn test_consumers_on_other_threads() {
    let dev = device(FAN_OUT_MAP);
    dev.open().unwrap();
    dev.activate_async_read().unwrap();

    let (subscribed_tx, subscribed_rx) = std::sync::mpsc::channel();
    let consumer = {
        let dev = dev.clone();
        std::thread::spawn(move || {
            let mut a = dev.subscribe::<i32>("DATA", 0, 0, push()).unwrap();
            a.read().unwrap();
            subscribed_tx.send(()).unwrap();
            a.read().unwrap();
            *a.get()
        })
    };
    subscribed_rx.recv().unwrap();
    dev.transport().lock().unwrap().poke(0, 0, &[99]);
    dev.dispatch_interrupt(0).unwrap();
    assert_eq!(consumer.join().unwrap(), 99);
}
