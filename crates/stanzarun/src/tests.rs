//! Engine, peer and memory view tests over the in-process network.

use std::sync::Arc;
use std::time::Duration;

use stanzapack::Binary;
use stanzapack::Value;
use stanzarpc::Fault;

use crate::engine::Engine;
use crate::engine::EngineConfig;
use crate::engine::Handler;
use crate::error::Error;
use crate::memview::Intent;
use crate::memview::MemoryView;
use crate::memview::MEMORY_VIEW_SUBTYPE;
use crate::memview::is_memory_view;
use crate::network::LocalNetwork;
use crate::peer::Peer;
use crate::region::Buffer;
use crate::region::BulkMode;
use crate::region::RegionHandle;
use crate::transport::ChannelTransport;
use crate::transport::Transport;

fn engines() -> (LocalNetwork, Engine, Engine) {
    let network = LocalNetwork::new();
    let a = Engine::new(&network, EngineConfig::default());
    let b = Engine::new(&network, EngineConfig::default());
    (network, a, b)
}

fn echo() -> Arc<dyn Handler> {
    Arc::new(|body: Vec<u8>| async move { Ok::<_, Fault>(body) })
}

fn counting(len: usize) -> Buffer {
    Buffer::from_vec((0..len).map(|i| i as u8).collect())
}

/// Waits for a spawned write-back to land.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

// ============================================================================
//  Dispatch
// ============================================================================

#[tokio::test]
async fn calls_reach_registered_handlers() {
    let (_net, a, b) = engines();
    b.register_provider(3, "echo").unwrap();
    b.register_handler(3, "echo", echo());

    let reply = a.call(b.address(), 3, "echo", b"hello").await.unwrap();
    assert_eq!(reply, b"hello");
}

#[tokio::test]
async fn unknown_provider_and_operation_are_faults() {
    let (_net, a, b) = engines();
    b.register_provider(3, "echo").unwrap();

    let err = a.call(b.address(), 9, "echo", &[]).await.unwrap_err();
    assert_eq!(err, Error::Fault(Fault::UnknownProvider(9)));

    let err = a.call(b.address(), 3, "missing", &[]).await.unwrap_err();
    assert_eq!(err, Error::Fault(Fault::UnknownOperation("missing".into())));
}

#[tokio::test]
async fn duplicate_provider_ids_are_rejected() {
    let (_net, a, _b) = engines();
    a.register_provider(1, "first").unwrap();
    assert_eq!(a.register_provider(1, "second"), Err(Error::DuplicateProvider(1)));

    a.deregister_provider(1);
    assert!(!a.has_provider(1));
    a.register_provider(1, "second").unwrap();
}

#[tokio::test]
async fn deregistering_drops_handlers() {
    let (_net, a, b) = engines();
    b.register_provider(3, "echo").unwrap();
    b.register_handler(3, "echo", echo());
    b.deregister_provider(3);

    let err = a.call(b.address(), 3, "echo", &[]).await.unwrap_err();
    assert_eq!(err, Error::Fault(Fault::UnknownProvider(3)));
}

#[tokio::test]
async fn identity_names_the_provider() {
    let (_net, a, b) = engines();
    b.register_provider(4, "stanza").unwrap();

    assert_eq!(a.identity(b.address(), 4).await.unwrap(), "stanza");
    let err = a.identity(b.address(), 5).await.unwrap_err();
    assert_eq!(err, Error::NotAProvider { address: b.address().to_string(), provider_id: 5 });
}

#[tokio::test]
async fn declare_is_idempotent() {
    let (_net, a, _b) = engines();
    let first = a.declare("op");
    let second = a.declare("op");
    assert_eq!(first.name(), second.name());
    assert!(a.is_declared("op"));
    assert!(!a.is_declared("other"));
}

#[tokio::test]
async fn submit_resolves_without_blocking_the_caller() {
    let (_net, a, b) = engines();
    b.register_provider(3, "echo").unwrap();
    b.register_handler(3, "echo", echo());

    let procedure = a.declare("echo");
    let rx = a.submit(b.address(), 3, &procedure, vec![1, 2, 3]);
    assert_eq!(rx.await.unwrap().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn peers_are_cached() {
    let (_net, a, b) = engines();
    let first = a.lookup(b.address()).await.unwrap();
    let second = a.lookup(b.address()).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.address(), b.address());
}

#[tokio::test]
async fn unknown_addresses_are_unreachable() {
    let (_net, a, _b) = engines();
    let err = a.call("local://nowhere", 1, "op", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Transport(crate::transport::Error::Unreachable(_))), "{:?}", err);
}

#[tokio::test]
async fn dropped_engines_leave_the_network() {
    let (net, a, b) = engines();
    let address = b.address().to_string();
    assert_eq!(net.engine_count(), 2);
    drop(b);
    assert_eq!(net.engine_count(), 1);

    let err = a.call(&address, 1, "op", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{:?}", err);
}

#[tokio::test]
async fn handlers_run_concurrently() {
    let (_net, a, b) = engines();
    b.register_provider(3, "slow").unwrap();
    b.register_handler(
        3,
        "slow",
        Arc::new(|body: Vec<u8>| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, Fault>(body)
        }),
    );

    let started = std::time::Instant::now();
    let calls = (0..8u8).map(|i| {
        let a = a.clone();
        let address = b.address().to_string();
        tokio::spawn(async move { a.call(&address, 3, "slow", &[i]).await })
    });
    for (i, call) in calls.collect::<Vec<_>>().into_iter().enumerate() {
        assert_eq!(call.await.unwrap().unwrap(), vec![i as u8]);
    }
    assert!(started.elapsed() < Duration::from_millis(350));
}

// ============================================================================
//  Peer
// ============================================================================

#[tokio::test]
async fn lost_connection_fails_pending_calls() {
    let (client, server) = ChannelTransport::pair();
    let peer = Arc::new(Peer::new("local://test", Box::new(client)));

    let call = tokio::spawn({
        let peer = peer.clone();
        async move { peer.call(1, "never", &[]).await }
    });

    // Once the call frame arrives the waiter is registered.
    assert!(server.recv().await.unwrap().is_some());
    drop(server);

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{:?}", err);
    assert!(eventually(|| peer.is_closed()).await);

    let err = peer.call(1, "again", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{:?}", err);
}

// ============================================================================
//  Bulk regions
// ============================================================================

#[tokio::test]
async fn bulk_pull_reads_a_window() {
    let (_net, a, b) = engines();
    let exposure = b.expose(counting(16), BulkMode::ReadOnly);

    let bytes = a.pull(b.address(), &exposure.handle(), 4, 4).await.unwrap();
    assert_eq!(bytes, vec![4, 5, 6, 7]);
}

#[tokio::test]
async fn bulk_access_follows_the_region_mode() {
    let (_net, a, b) = engines();
    let read_only = b.expose(counting(8), BulkMode::ReadOnly);
    let write_only = b.expose(Buffer::new(8), BulkMode::WriteOnly);

    let err = a.push(b.address(), &read_only.handle(), 0, &[1]).await.unwrap_err();
    assert_eq!(err, Error::Fault(Fault::AccessDenied(read_only.handle().id)));

    let err = a.pull(b.address(), &write_only.handle(), 0, 1).await.unwrap_err();
    assert_eq!(err, Error::Fault(Fault::AccessDenied(write_only.handle().id)));

    a.push(b.address(), &write_only.handle(), 6, &[9, 9]).await.unwrap();
    assert_eq!(b.region(write_only.handle().id).unwrap().to_vec(), vec![0, 0, 0, 0, 0, 0, 9, 9]);
}

#[tokio::test]
async fn bulk_access_is_bounds_checked() {
    let (_net, a, b) = engines();
    let exposure = b.expose(counting(8), BulkMode::ReadWrite);
    let handle = exposure.handle();

    let err = a.pull(b.address(), &handle, 6, 4).await.unwrap_err();
    assert_eq!(err, Error::Fault(Fault::OutOfBounds { offset: 6, length: 4, size: 8 }));

    let err = a.push(b.address(), &handle, 8, &[1]).await.unwrap_err();
    assert!(matches!(err, Error::Fault(Fault::OutOfBounds { .. })), "{:?}", err);
}

#[tokio::test]
async fn dropped_exposures_are_withdrawn() {
    let (_net, a, b) = engines();
    let exposure = b.expose(counting(8), BulkMode::ReadWrite);
    let handle = exposure.handle();
    assert_eq!(b.region_count(), 1);

    drop(exposure);
    assert_eq!(b.region_count(), 0);
    let err = a.pull(b.address(), &handle, 0, 1).await.unwrap_err();
    assert_eq!(err, Error::Fault(Fault::InvalidRegion(handle.id)));
}

// ============================================================================
//  Memory views
// ============================================================================

#[tokio::test]
async fn blob_round_trip_keeps_local_identity() {
    let (_net, a, _b) = engines();
    let buffer = counting(64);
    let view = MemoryView::expose(&a, buffer.clone(), Intent::InOut);

    let decoded = MemoryView::from_blob(&a, &view.to_blob()).unwrap();
    assert_eq!(decoded.size(), 64);
    assert!(decoded.is_local());

    let data = decoded.data().await.unwrap();
    assert!(data.same_memory(&buffer));
    assert!(decoded == view);

    data.with_mut(|bytes| bytes[0] = 200);
    assert_eq!(buffer.to_vec()[0], 200);
}

#[tokio::test]
async fn blob_layout() {
    let (_net, a, _b) = engines();
    let view = MemoryView::expose(&a, Buffer::new(10), Intent::Out);
    let blob = view.to_blob();
    let owner = a.address().as_bytes();

    let u64_at = |at: usize| u64::from_ne_bytes(blob[at..at + 8].try_into().unwrap());

    assert_eq!(blob[0], 2);
    assert_eq!(u64_at(1), owner.len() as u64);
    assert_eq!(&blob[9..9 + owner.len()], owner);
    let at = 9 + owner.len();
    assert_eq!(u64_at(at), RegionHandle::ENCODED_LEN as u64);
    let handle = RegionHandle::from_bytes(&blob[at + 8..at + 8 + RegionHandle::ENCODED_LEN]).unwrap();
    assert_eq!(handle, view.handle());
    let at = at + 8 + RegionHandle::ENCODED_LEN;
    assert_eq!(u64_at(at), 0);
    assert_eq!(u64_at(at + 8), 10);
    assert_eq!(blob.len(), at + 16);
}

#[tokio::test]
async fn malformed_blobs_are_rejected() {
    let (_net, a, _b) = engines();
    let view = MemoryView::expose(&a, Buffer::new(4), Intent::In);
    let blob = view.to_blob();

    assert!(matches!(MemoryView::from_blob(&a, &blob[..blob.len() - 1]), Err(Error::InvalidView(_))));

    let mut trailing = blob.clone();
    trailing.push(0);
    assert!(matches!(MemoryView::from_blob(&a, &trailing), Err(Error::InvalidView(_))));

    let mut bad_intent = blob.clone();
    bad_intent[0] = 9;
    assert!(matches!(MemoryView::from_blob(&a, &bad_intent), Err(Error::InvalidView(_))));

    // A window that runs past the region it names.
    let mut too_long = blob;
    let end = too_long.len();
    too_long[end - 8..].copy_from_slice(&5u64.to_ne_bytes());
    assert!(matches!(MemoryView::from_blob(&a, &too_long), Err(Error::InvalidView(_))));
}

#[tokio::test]
async fn from_region_checks_the_window() {
    let (_net, a, _b) = engines();
    let handle = RegionHandle { id: 1, len: 10, mode: BulkMode::ReadWrite };
    let owner = a.address();

    let view = MemoryView::from_region(&a, handle, owner, Intent::In, Some(4), Some(6)).unwrap();
    assert_eq!((view.offset(), view.size()), (4, 6));

    let view = MemoryView::from_region(&a, handle, owner, Intent::In, Some(3), None).unwrap();
    assert_eq!(view.size(), 7);

    for (offset, length) in [(Some(4), Some(7)), (Some(11), None), (Some(u64::MAX), Some(2))] {
        let result = MemoryView::from_region(&a, handle, owner, Intent::In, offset, length);
        assert!(matches!(result, Err(Error::InvalidView(_))), "{:?} {:?}", offset, length);
    }
}

#[tokio::test]
async fn views_are_recognised_in_values() {
    let (_net, a, _b) = engines();
    let view = MemoryView::expose(&a, counting(8), Intent::In);

    let value = view.to_value();
    assert!(is_memory_view(&value));
    assert!(!is_memory_view(&Value::Binary(Binary::new(vec![1, 2]))));
    assert!(!is_memory_view(&Value::Binary(Binary::with_subtype(MEMORY_VIEW_SUBTYPE + 1, vec![1]))));
    assert!(!is_memory_view(&Value::from("text")));

    // A value tree that went through JSON text still carries the view.
    let dumped = Value::from_json_str(&value.to_json_string()).unwrap();
    assert!(is_memory_view(&dumped));
    let decoded = MemoryView::from_value(&a, &dumped).unwrap();
    assert_eq!(decoded.to_blob(), view.to_blob());

    assert!(MemoryView::from_value(&a, &Value::Binary(Binary::new(vec![0; 4]))).is_err());
}

#[tokio::test]
async fn remote_in_view_copies_and_never_writes_back() {
    let (_net, owner, callee) = engines();
    let buffer = counting(32);
    let view = MemoryView::expose(&owner, buffer.clone(), Intent::In);

    let remote = MemoryView::from_blob(&callee, &view.to_blob()).unwrap();
    assert!(!remote.is_local());
    let data = remote.data().await.unwrap();
    assert_eq!(data.to_vec(), buffer.to_vec());
    assert!(!data.same_memory(&buffer));
    assert_eq!(callee.region_count(), 1);

    data.with_mut(|bytes| bytes.fill(0xEE));
    remote.release().await.unwrap();
    assert_eq!(buffer.to_vec(), counting(32).to_vec());
    assert_eq!(callee.region_count(), 0);
}

#[tokio::test]
async fn remote_out_view_writes_back_on_release() {
    let (_net, owner, callee) = engines();
    let buffer = counting(16);
    let view = MemoryView::expose(&owner, buffer.clone(), Intent::Out);

    let remote = MemoryView::from_blob(&callee, &view.to_blob()).unwrap();
    let data = remote.data().await.unwrap();
    // Nothing was fetched for a write-only view.
    assert_eq!(data.to_vec(), vec![0; 16]);

    data.with_mut(|bytes| bytes.fill(7));
    remote.release().await.unwrap();
    assert_eq!(buffer.to_vec(), vec![7; 16]);
}

#[tokio::test]
async fn remote_view_writes_back_on_drop() {
    let (_net, owner, callee) = engines();
    let buffer = Buffer::new(8);
    let view = MemoryView::expose(&owner, buffer.clone(), Intent::InOut);

    {
        let remote = MemoryView::from_blob(&callee, &view.to_blob()).unwrap();
        let data = remote.data().await.unwrap();
        data.with_mut(|bytes| bytes.copy_from_slice(b"dropped!"));
    }

    assert!(eventually(|| buffer.to_vec() == b"dropped!").await);
}

#[tokio::test]
async fn remote_view_of_a_window() {
    let (_net, owner, callee) = engines();
    let buffer = counting(16);
    let exposure = owner.expose(buffer.clone(), Intent::InOut.owner_mode());

    let remote = MemoryView::from_region(&callee, exposure.handle(), owner.address(), Intent::InOut, Some(8), Some(4)).unwrap();
    let data = remote.data().await.unwrap();
    assert_eq!(data.to_vec(), vec![8, 9, 10, 11]);

    data.with_mut(|bytes| bytes.fill(0));
    remote.release().await.unwrap();
    assert_eq!(buffer.to_vec()[7..13], [7, 0, 0, 0, 0, 12]);
}
