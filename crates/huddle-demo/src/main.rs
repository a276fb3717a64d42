//! Walks a small channel through its whole lifecycle: first distribution,
//! messaging, a late joiner, a departure, and a direct message.

mod config;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use huddle_core::sqlite_store::SqliteStore;
use huddle_core::{
    ChannelMessage, Decrypted, GroupEngine, GroupSession, InMemoryDirectory, InMemoryStore,
    KeyValueStore, LoopbackChannel, MessageContext, Placeholders,
};

use crate::config::DemoConfig;

type Store = Arc<dyn KeyValueStore>;
type Session = GroupSession<Store, InMemoryDirectory, LoopbackChannel>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DemoConfig::load().context("loading configuration")?;
    info!(channel = %config.channel, participants = config.participants.len(), "starting demo");

    let directory = InMemoryDirectory::new();
    let bus = LoopbackChannel::default();
    let mut rx = bus.subscribe();

    let mut sessions = Vec::new();
    for user in &config.participants {
        let engine = GroupEngine::with_config(open_store(&config, user)?, &config.engine);
        let session = GroupSession::new(user.clone(), Arc::new(engine), directory.clone(), bus.clone());
        session.start().await?;
        sessions.push(session);
    }

    let channel = config.channel.as_str();
    let placeholders = &config.engine.placeholders;
    let (late, early) = sessions
        .split_last()
        .context("no participants configured")?;

    println!("== {} members join #{}", early.len(), channel);
    for s in early {
        directory.add_member(channel, s.user_id()).await;
    }
    for s in early {
        s.send(channel, &format!("hello from {}", s.user_id())).await?;
    }
    pump(&mut rx, &sessions, placeholders).await?;

    println!("== {} joins late", late.user_id());
    directory.add_member(channel, late.user_id()).await;
    for s in early {
        s.membership_changed(channel).await?;
    }
    late.send(channel, "hi all, just got here").await?;
    early[0].send(channel, "welcome!").await?;
    pump(&mut rx, &sessions, placeholders).await?;

    let leaving = &early[1];
    println!("== {} leaves", leaving.user_id());
    directory.remove_member(channel, leaving.user_id()).await;
    for s in sessions.iter().filter(|s| s.user_id() != leaving.user_id()) {
        s.membership_changed(channel).await?;
    }
    early[0].send(channel, "the rest of us can still talk").await?;
    pump(&mut rx, &sessions, placeholders).await?;

    println!("== direct message");
    direct_message(&early[0], late, placeholders).await?;

    Ok(())
}

fn open_store(config: &DemoConfig, user: &str) -> anyhow::Result<Store> {
    match &config.state_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
            let path = dir.join(format!("{}.db", user));
            let store = SqliteStore::new(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

/// Deliver everything queued on the bus to every session and print what
/// each one sees.
async fn pump(
    rx: &mut broadcast::Receiver<ChannelMessage>,
    sessions: &[Session],
    placeholders: &Placeholders,
) -> anyhow::Result<()> {
    while let Ok(msg) = rx.try_recv() {
        for s in sessions {
            let seen = s.receive(&msg.channel_id, &msg.wire).await?;
            if let Some(text) = seen.render(placeholders) {
                println!("  [{:>8}] {}: {}", s.user_id(), msg.from, text);
            }
        }
    }
    Ok(())
}

async fn direct_message(from: &Session, to: &Session, placeholders: &Placeholders) -> anyhow::Result<()> {
    let to_key = to
        .engine()
        .export_public_key(to.user_id())
        .await?
        .context("recipient has no identity")?;
    let from_key = from
        .engine()
        .export_public_key(from.user_id())
        .await?
        .context("sender has no identity")?;

    let wire = from
        .engine()
        .encrypt_direct("this one is just for you", from.user_id(), &to_key)
        .await?;
    let ctx = MessageContext::channel("direct")
        .with_reader(to.user_id())
        .with_peer(from_key);

    let seen = to.engine().decrypt_with(&wire, &ctx).await;
    if let Decrypted::Message(_) = seen {
        info!(from = %from.user_id(), to = %to.user_id(), "direct message delivered");
    }
    if let Some(text) = seen.render(placeholders) {
        println!("  [{:>8}] {} (direct): {}", to.user_id(), from.user_id(), text);
    }
    Ok(())
}
