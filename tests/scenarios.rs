//! End-to-end reaction scenarios.
//!
//! Covered:
//! - A: exact KB match with a liked tag → `like`
//! - B: empty KB + unknown policy fully weighted on `like` → always `like`
//! - C: title-only ambiguity cap from notes
//! - D: special rule wins over scoring and never touches the random source

use nowplaying_reactor::{
    react::DecisionInput, AppConfig, Bucket, KnowledgeBaseIndex, RandomSource, ReactionConfig,
    ReactionDecision, ReactionEngine, Reactor, SongEntry,
};
use serde_json::{json, Value};
use std::{fs, path::Path};

fn write_json(path: &Path, v: &Value) {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).unwrap();
    }
    fs::write(path, serde_json::to_vec_pretty(v).unwrap()).unwrap();
}

/// Lay out a config dir with KB + reactions and build a seeded reactor.
fn reactor_in(dir: &Path, kb: Value, reactions: Value) -> Reactor {
    write_json(&dir.join("songs_kb.json"), &kb);
    write_json(&dir.join("Memory/reactions.json"), &reactions);
    write_json(&dir.join("reactor.json"), &json!({"songs_kb_path": "songs_kb.json"}));
    let cfg = AppConfig::load(&dir.join("reactor.json")).unwrap();
    Reactor::from_config(&cfg).unwrap().with_rng(RandomSource::seeded(7))
}

#[test]
fn scenario_a_exact_match_liked_tag() {
    let dir = tempfile::tempdir().unwrap();
    let mut r = reactor_in(
        dir.path(),
        json!([{"title": "Shape of You", "artist": "Ed Sheeran", "tags": ["pop"]}]),
        json!({"bias": {"like_tags": ["pop"]}}),
    );

    let out = r.react("Shape of You — Ed Sheeran").expect("titled input");
    let matched = out.matched.as_ref().expect("KB match");
    assert_eq!(matched.kind, "exact");
    assert_eq!(matched.artist, "Ed Sheeran");
    assert_eq!(out.genres_text, "pop");
    assert_eq!(out.tags, vec!["pop"]);
    assert_eq!(out.decision.bucket, Bucket::Like);
    assert_eq!(out.decision.text, "LOVE IT! 😍");
}

#[test]
fn scenario_b_unknown_policy_always_like() {
    let dir = tempfile::tempdir().unwrap();
    let mut r = reactor_in(
        dir.path(),
        json!([]),
        json!({"unknown_policy": {"enabled": true, "like": 1.0, "neutral": 0, "dislike": 0}}),
    );

    for line in ["Some Song - Someone", "Another One", "x by y", "{\"title\": \"JSON Song\"}"] {
        let out = r.react(line).expect("titled input");
        assert!(out.matched.is_none());
        assert_eq!(out.genres_text, "New song :) let's listen");
        assert_eq!(out.decision.bucket, Bucket::Like, "line {line:?}");
    }
    assert!(r.react("   ").is_none());
}

#[test]
fn scenario_c_title_only_ambiguity_cap() {
    let with_notes = SongEntry::new("Echo", "Crusher-P")
        .with_notes(r#"{"allow_title_only": true, "max_ambiguous_candidates": 1}"#);
    let other = SongEntry::new("ECHO!", "Someone Else");

    let idx = KnowledgeBaseIndex::build(vec![with_notes.clone(), other]);
    assert_eq!(idx.candidates_for_title("echo"), 2);
    assert!(idx.exact("Echo", None).is_none());

    let idx = KnowledgeBaseIndex::build(vec![with_notes]);
    let hit = idx.exact("Echo", None).expect("single candidate resolves");
    assert_eq!(hit.artist, "Crusher-P");
}

#[test]
fn scenario_d_special_rule_is_fixed_and_draw_free() {
    let cfg = ReactionConfig::from_json_str(
        r#"{
            "special": [{"title_contains": ["never gonna give"], "react": "🎵 Classic!", "force_bucket": "like"}],
            "bias": {"dislike_tags": ["pop"], "dislike_artists": ["rick"]},
            "explore": {"enabled": true, "chance": 1.0},
            "unknown_policy": {"like": 0, "neutral": 0, "dislike": 1}
        }"#,
    );
    let mut engine = ReactionEngine::new(cfg, Path::new("."));
    let mut rng = RandomSource::seeded(99);

    let tag_sets: [Vec<String>; 3] = [vec![], vec!["pop".into()], vec!["metal".into(), "pop".into()]];
    for artist in ["Rick Astley", "", "Cover Band"] {
        for tags in &tag_sets {
            let input = DecisionInput {
                title: "Never Gonna Give You Up",
                artist,
                genres_text: "",
                tags,
                unique_key: "never gonna give you up|rick astley",
            };
            assert_eq!(engine.decide(&input, &mut rng), ReactionDecision::like("🎵 Classic!"));
        }
    }
    assert_eq!(rng.draws(), 0);
}

#[test]
fn scenario_d_through_the_reactor() {
    let dir = tempfile::tempdir().unwrap();
    let mut r = reactor_in(
        dir.path(),
        json!([{"title": "Never Gonna Give You Up", "artist": "Rick Astley", "tags": ["pop"]}]),
        json!({"special": [{"title_contains": ["never gonna give"], "react": "🎵 Classic!", "force_bucket": "like"}]}),
    );
    let out = r.react("Never Gonna Give You Up - Rick Astley").unwrap();
    assert_eq!(out.decision, ReactionDecision::like("🎵 Classic!"));
    assert_eq!(out.text, "🎵 Classic!");
    assert_eq!(out.seen, 1);
}
