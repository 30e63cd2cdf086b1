// Integration test for scenario 6 (at reduced scale): many concurrent
// remote clients doing get/put round-trips against the same coordinator
// over the real wire protocol must never lose or duplicate an argument.
//
// The literal scenario inserts 2000 args and drives 40 parallel processes
// through 50 round-trips each; this exercises the same property — the
// queue's `pending`/`gotten` partition survives concurrent remote
// access — at a scale that keeps the test fast.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use corral::wire::{RetryConfig, TypedProxy, WireProxy};
use corral::Coordinator;

const NUM_ARGS: i64 = 300;
const NUM_CLIENTS: usize = 10;
const ROUND_TRIPS_PER_CLIENT: usize = 15;

#[test]
fn concurrent_get_put_round_trips_lose_nothing() {
    let authkey: Arc<Vec<u8>> = Arc::new(b"heavy-load-test-key".to_vec());
    let mut coordinator = Coordinator::new(None, Duration::from_millis(50));
    for n in 0..NUM_ARGS {
        coordinator.insert(bincode::serialize(&n).unwrap()).unwrap();
    }
    let coordinator = Arc::new(coordinator);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(AtomicBool::new(false));

    let serve_coordinator = Arc::clone(&coordinator);
    let serve_shutdown = Arc::clone(&shutdown);
    let serve_authkey = Arc::clone(&authkey);
    let accept_handle = std::thread::spawn(move || {
        serve_coordinator.serve(listener, serve_authkey, &serve_shutdown).unwrap();
    });

    let clients: Vec<_> = (0..NUM_CLIENTS)
        .map(|_| {
            let authkey = (*authkey).clone();
            std::thread::spawn(move || {
                let proxy = WireProxy::connect_to(
                    "127.0.0.1",
                    addr.port(),
                    authkey,
                    RetryConfig { reconnect_tries: 10, reconnect_wait: Duration::from_millis(20), ..RetryConfig::default() },
                )
                .unwrap();
                let typed: TypedProxy<i64, i64, i64> = TypedProxy::new(proxy);
                for _ in 0..ROUND_TRIPS_PER_CLIENT {
                    let arg = typed.job_q_get(true, Duration::from_secs(5)).expect("job_q.get");
                    typed.job_q_put(&arg).expect("job_q.put");
                }
            })
        })
        .collect();

    for client in clients {
        client.join().expect("client thread panicked");
    }

    shutdown.store(true, Ordering::SeqCst);
    coordinator.close();
    accept_handle.join().expect("accept thread panicked");

    let accounting = coordinator.accounting();
    assert_eq!(accounting.inserted, NUM_ARGS as u64);
    assert_eq!(accounting.queued, NUM_ARGS as u64, "every argument should have been put back");
    assert_eq!(accounting.unqueried, 0, "no argument should be left stuck in the gotten state");
    assert_eq!(accounting.succeeded, 0);
    assert_eq!(accounting.failed, 0);
}
