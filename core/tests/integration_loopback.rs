//! End-to-End Integration Tests for adradio
//!
//! Two or more RadioLinks share a LoopbackAir and exchange messages the way
//! radios in range of each other would:
//! 1. Framing and broadcast on the sender
//! 2. Repeated emissions while the message is on air
//! 3. Channel filtering and duplicate suppression on the receiver
//!
//! Time is paused, so the half-second on-air windows cost nothing.
//!
//! Run with: cargo test --test integration_loopback

use adradio_core::transport::{TransportStats, ADVERTISING_INTERVAL};
use adradio_core::{LoopbackAir, RadioError, RadioLink, AD_DURATION, SCAN_TIMEOUT};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_e2e_message_between_two_links() {
    let air = LoopbackAir::new();
    let alice = RadioLink::with_channel(Arc::new(air.attach(vec![0xa1], -30)), 7).unwrap();
    let bob = RadioLink::with_channel(Arc::new(air.attach(vec![0xb0], -45)), 7).unwrap();

    let ((first, second), sent) = tokio::join!(
        async {
            let first = bob.receive_full().await.unwrap();
            // Alice is still on air and repeating the same frame
            let second = bob.receive_full().await.unwrap();
            (first, second)
        },
        alice.send_bytes(b"Hi")
    );
    sent.unwrap();

    let message = first.expect("Bob should hear Alice");
    assert_eq!(message.payload, b"Hi".to_vec());
    assert_eq!(message.rssi, -30);
    assert_eq!(message.sender_address, vec![0xa1]);
    println!("✓ Bob received {:?} from {:?}", message.payload, message.sender_address);

    assert!(second.is_none(), "Repeat within the window is suppressed");
    assert_eq!(bob.pool_len(), 1);
    assert_eq!(alice.sequence(), 1);
    println!("✓ Repeated emission suppressed");
}

#[tokio::test(start_paused = true)]
async fn test_e2e_text_roundtrip() {
    let air = LoopbackAir::new();
    let alice = RadioLink::new(Arc::new(air.attach(vec![0xa1], -30)));
    let bob = RadioLink::new(Arc::new(air.attach(vec![0xb0], -45)));

    let (received, sent) = tokio::join!(bob.receive(), alice.send("testing 1, 2, 3"));
    sent.unwrap();

    assert_eq!(received.unwrap(), Some("testing 1, 2, 3".to_string()));
    println!("✓ Text message delivered on default channel");
}

#[tokio::test(start_paused = true)]
async fn test_other_channel_is_not_heard() {
    let air = LoopbackAir::new();
    let alice = RadioLink::with_channel(Arc::new(air.attach(vec![0xa1], -30)), 7).unwrap();
    let bob = RadioLink::new(Arc::new(air.attach(vec![0xb0], -45)));

    let start = Instant::now();
    let (received, sent) = tokio::join!(bob.receive_full(), alice.send_bytes(b"psst"));
    sent.unwrap();

    assert!(received.unwrap().is_none());
    assert!(start.elapsed() >= SCAN_TIMEOUT, "Scan ran to its deadline");
    assert_eq!(bob.pool_len(), 0);
    println!("✓ Channel 7 traffic ignored on channel 42");
}

#[tokio::test(start_paused = true)]
async fn test_retuned_link_hears_new_channel() {
    let air = LoopbackAir::new();
    let alice = RadioLink::with_channel(Arc::new(air.attach(vec![0xa1], -30)), 7).unwrap();
    let bob = RadioLink::new(Arc::new(air.attach(vec![0xb0], -45)));

    bob.configure(7).unwrap();
    let (received, sent) = tokio::join!(bob.receive_full(), alice.send_bytes(b"found you"));
    sent.unwrap();

    assert_eq!(received.unwrap().unwrap().payload, b"found you".to_vec());
    println!("✓ Reconfigured link receives on channel 7");
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_messages_are_both_delivered() {
    let air = LoopbackAir::new();
    let alice = RadioLink::new(Arc::new(air.attach(vec![0xa1], -30)));
    let bob = RadioLink::new(Arc::new(air.attach(vec![0xb0], -45)));

    let (messages, ()) = tokio::join!(
        async {
            let mut messages = Vec::new();
            for _ in 0..20 {
                if let Some(text) = bob.receive().await.unwrap() {
                    messages.push(text);
                    if messages.len() == 2 {
                        break;
                    }
                }
            }
            messages
        },
        async {
            alice.send("one").await.unwrap();
            alice.send("two").await.unwrap();
        }
    );

    assert_eq!(messages, vec!["one".to_string(), "two".to_string()]);
    assert_eq!(alice.sequence(), 2);
    println!("✓ Both messages delivered in order, repeats dropped");
}

#[tokio::test(start_paused = true)]
async fn test_senders_are_told_apart() {
    let air = LoopbackAir::new();
    let alice = RadioLink::new(Arc::new(air.attach(vec![0xa1], -30)));
    let carol = RadioLink::new(Arc::new(air.attach(vec![0xc0], -60)));
    let bob = RadioLink::new(Arc::new(air.attach(vec![0xb0], -45)));

    // Both senders use sequence 0; only the address separates them.
    // Carol starts slightly later so her emissions interleave with Alice's.
    let (senders, sent_a, sent_c) = tokio::join!(
        async {
            let mut senders = HashSet::new();
            for _ in 0..20 {
                if let Some(message) = bob.receive_full().await.unwrap() {
                    senders.insert(message.sender_address);
                    if senders.len() == 2 {
                        break;
                    }
                }
            }
            senders
        },
        alice.send("from alice"),
        async {
            tokio::time::sleep(ADVERTISING_INTERVAL / 2).await;
            carol.send("from carol").await
        }
    );
    sent_a.unwrap();
    sent_c.unwrap();

    assert!(senders.contains(&vec![0xa1]));
    assert!(senders.contains(&vec![0xc0]));
    println!("✓ Same sequence from two senders accepted twice");
}

#[tokio::test(start_paused = true)]
async fn test_transports_are_released_after_use() {
    let air = LoopbackAir::new();
    let alice_radio = Arc::new(air.attach(vec![0xa1], -30));
    let bob_radio = Arc::new(air.attach(vec![0xb0], -45));
    let alice = RadioLink::new(alice_radio.clone());
    let bob = RadioLink::new(bob_radio.clone());

    let (received, sent) = tokio::join!(bob.receive_full(), alice.send_bytes(b"bye"));
    sent.unwrap();
    received.unwrap();

    assert!(!alice_radio.is_broadcasting());
    assert_eq!(
        alice_radio.stats(),
        TransportStats {
            broadcasts_started: 1,
            broadcasts_stopped: 1,
            ..Default::default()
        }
    );
    let stats = bob_radio.stats();
    assert_eq!(stats.scans_started, 1);
    assert_eq!(stats.scans_stopped, 1);
    println!("✓ Broadcast and scan stopped after each operation");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_listener() {
    let air = LoopbackAir::new();
    let bob_radio = Arc::new(air.attach(vec![0xb0], -45));
    let bob = Arc::new(RadioLink::new(bob_radio.clone()));

    let listener = {
        let bob = bob.clone();
        tokio::spawn(async move { bob.receive_full().await })
    };
    tokio::time::sleep(AD_DURATION / 5).await;
    bob.shutdown();

    let result = listener.await.unwrap();
    assert!(matches!(result, Err(RadioError::Shutdown)));
    assert_eq!(bob_radio.stats().scans_stopped, 1);
    assert!(matches!(bob.send("late").await, Err(RadioError::Shutdown)));
    println!("✓ Shutdown released the radio and refuses new work");
}
