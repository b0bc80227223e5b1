mod fixtures;

use std::collections::BTreeSet;

use autopatch::listing::{ListOptions, Listing};
use autopatch::{
    ConnectionIntent, PatternSet, PatternStore, RefreshRequest, RunOutcome, SessionManager,
    SessionState,
};
use fixtures::{eventually, Studio};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

fn store(exact: bool, pairs: &[&str]) -> PatternStore {
    let mut set = PatternSet::new(exact);
    set.add_pairs(pairs);
    PatternStore::new(set, None)
}

fn requested(studio: &Studio) -> BTreeSet<(String, String)> {
    studio
        .graph
        .connect_calls()
        .into_iter()
        .map(|ConnectionIntent { output, input }| (output, input))
        .collect()
}

fn pairs(expected: &[(&str, &str)]) -> BTreeSet<(String, String)> {
    expected
        .iter()
        .map(|(o, i)| (o.to_string(), i.to_string()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn connects_by_substitution_and_pretty_name() {
    let studio = Studio::new();
    let patterns = store(
        false,
        &[
            r"system:capture_(?P<n>\d)",
            "ardour:Audio 1/audio_in {n}",
            "fluidsynth:out_",
            "Scarlett 2i2:playback_",
        ],
    );
    let mut manager = SessionManager::new(studio.graph.clone(), patterns, studio.options());
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { manager.run(cancel).await }
    });

    let expected = pairs(&[
        ("system:capture_1", "ardour:Audio 1/audio_in 1"),
        ("system:capture_2", "ardour:Audio 1/audio_in 2"),
        ("fluidsynth:out_L", "system:playback_1"),
        ("fluidsynth:out_L", "system:playback_2"),
        ("fluidsynth:out_R", "system:playback_1"),
        ("fluidsynth:out_R", "system:playback_2"),
    ]);
    eventually("all links", || requested(&studio) == expected).await;
    assert_eq!(requested(&studio), expected);

    cancel.cancel();
    assert_eq!(task.await.unwrap().unwrap(), RunOutcome::Aborted);
}

#[tokio::test(start_paused = true)]
async fn exact_mode_mixes_literal_and_delimited_regex() {
    let studio = Studio::new();
    let patterns = store(
        true,
        &[
            "a2j:Keystep [24] (capture): Keystep MIDI 1",
            "fluidsynth:midi_00",
            "drumkv1:out_1",
            "/ardour:Audio 1/audio_in [12]/",
            // literal, so the dot does not match the underscore
            "drumkv1:out.1",
            "system:playback_1",
        ],
    );
    let mut manager = SessionManager::new(studio.graph.clone(), patterns, studio.options());
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { manager.run(cancel).await }
    });

    let expected = pairs(&[
        ("a2j:Keystep [24] (capture): Keystep MIDI 1", "fluidsynth:midi_00"),
        ("drumkv1:out_1", "ardour:Audio 1/audio_in 1"),
        ("drumkv1:out_1", "ardour:Audio 1/audio_in 2"),
    ]);
    eventually("links", || requested(&studio) == expected).await;

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert!(!studio.linked("drumkv1:out_1", "system:playback_1"));
}

#[tokio::test(start_paused = true)]
async fn existing_links_are_left_alone_and_failures_are_isolated() {
    let studio = Studio::new();
    studio.graph.link("fluidsynth:out_L", "system:playback_1");
    studio.graph.break_port("system:playback_2");

    let patterns = store(false, &["fluidsynth:out_", "system:playback_", "drumkv1:", "ardour:"]);
    let mut manager = SessionManager::new(studio.graph.clone(), patterns, studio.options());
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { manager.run(cancel).await }
    });

    eventually("drum links", || {
        studio.linked("drumkv1:out_1", "ardour:Audio 1/audio_in 1")
            && studio.linked("drumkv1:out_1", "ardour:Audio 1/audio_in 2")
    })
    .await;
    eventually("synth R", || studio.linked("fluidsynth:out_R", "system:playback_1")).await;

    let calls = requested(&studio);
    assert!(!calls.contains(&("fluidsynth:out_L".to_string(), "system:playback_1".to_string())));
    assert!(calls.contains(&("fluidsynth:out_L".to_string(), "system:playback_2".to_string())));
    assert!(!studio.linked("fluidsynth:out_L", "system:playback_2"));

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn reload_swaps_file_patterns_and_drops_command_line_pairs() {
    let studio = Studio::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patterns");
    std::fs::write(&path, "# drums\ndrumkv1:out_1\nardour:Audio 1/audio_in 1\n").unwrap();

    let mut set = PatternSet::from_file(&path, false).unwrap();
    set.add_pairs(&["fluidsynth:out_L", "system:playback_1"]);
    let patterns = PatternStore::new(set, Some(path.clone()));

    let mut manager = SessionManager::new(studio.graph.clone(), patterns.clone(), studio.options());
    let refresh = manager.refresh_handle();
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { manager.run(cancel).await }
    });

    eventually("startup links", || {
        studio.linked("drumkv1:out_1", "ardour:Audio 1/audio_in 1")
            && studio.linked("fluidsynth:out_L", "system:playback_1")
    })
    .await;

    std::fs::write(&path, "fluidsynth:out_R\nsystem:playback_2\n").unwrap();
    assert_eq!(patterns.reload().unwrap(), 1);
    assert!(refresh.request(RefreshRequest::PatternsReloaded));

    eventually("reloaded link", || studio.linked("fluidsynth:out_R", "system:playback_2")).await;
    assert_eq!(patterns.snapshot().len(), 1);

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn renamed_port_is_picked_up() {
    let studio = Studio::new();
    let patterns = store(false, &["drumkv1:kick", "system:playback_1"]);
    let mut manager = SessionManager::new(studio.graph.clone(), patterns, studio.options());
    let mut state = manager.state_watch();
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { manager.run(cancel).await }
    });

    state
        .wait_for(|s| *s == SessionState::Connected)
        .await
        .unwrap();
    assert!(studio.graph.connect_calls().is_empty());

    studio.graph.rename_port("drumkv1:out_1", "drumkv1:kick");
    eventually("renamed link", || studio.linked("drumkv1:kick", "system:playback_1")).await;

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn one_shot_listing_sees_the_whole_graph() {
    let studio = Studio::new();
    studio.graph.link("fluidsynth:out_L", "system:playback_1");

    let mut options = studio.options();
    options.max_attempts = 1;
    options.reconnect = false;
    let mut manager = SessionManager::new(
        studio.graph.clone(),
        PatternStore::new(PatternSet::default(), None),
        options,
    );

    let live = manager
        .connect(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    let list = ListOptions {
        inputs: true,
        connections: true,
        aliases: true,
        ..Default::default()
    };
    let listing = Listing::collect(live.graph(), &list).unwrap();
    drop(live);

    let mut out = Vec::new();
    listing.write_text(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.contains("system:playback_1\n    alsa_pcm:hw:Scarlett:out1\n"));
    assert!(text.contains("fluidsynth:out_L\n    -> system:playback_1\n"));
    assert!(!text.contains("Scarlett 2i2:"));
    assert_eq!(studio.graph.close_count(), 1);
}
