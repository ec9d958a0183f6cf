use std::time::Duration;
use tokio_event_admin::{Event, EventAdmin, HandlerState};

#[tokio::main]
async fn main() {
    println!("Testing tokio-event-admin...\n");

    // Create the event admin with a short handler timeout
    let admin = EventAdmin::builder()
        .per_handler_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    // Subscribe to events
    let handle = admin
        .subscribe_fn(["demo/message/*"], None, |event| async move {
            println!("📨 Received on {}: {:?}", event.topic(), event.property("text"));
            Ok(())
        })
        .unwrap();

    let errors = admin
        .subscribe_fn(["demo/message/*"], Some("(urgent=true)"), |event| async move {
            println!("🚨 Urgent: {:?}", event.property("text"));
            Ok(())
        })
        .unwrap();

    let slow = admin
        .subscribe_fn(["demo/*"], None, |_| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .unwrap();

    // Publish some events
    println!("Publishing events...");
    for (text, urgent) in [("Hello!", false), ("World!", false), ("Disk full!", true)] {
        let event = Event::builder("demo/message/POSTED")
            .property("text", text)
            .property("urgent", urgent)
            .build()
            .unwrap();
        let report = admin.publish_sync(event).await.unwrap();
        println!("   {report}");
    }

    println!(
        "\nSlow handler is now {:?}",
        admin.handler_state(slow.id()).unwrap_or(HandlerState::Destroyed)
    );
    println!("{}", admin.stats());

    // Clean up
    admin.unsubscribe(handle.id()).unwrap();
    admin.unsubscribe(errors.id()).unwrap();
    admin.shutdown().await.unwrap();

    println!("\n✅ Done");
}
