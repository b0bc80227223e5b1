#![allow(dead_code)]

use std::time::Duration;

use autopatch::backend::MemoryGraph;
use autopatch::{Port, PortDirection, PortId, SessionOptions};

/// A small studio: a stereo soft synth, a USB audio interface with ALSA
/// aliases, a drum machine, and a MIDI keyboard.
pub struct Studio {
    pub graph: MemoryGraph,
}

impl Studio {
    pub fn new() -> Self {
        let graph = MemoryGraph::new();

        for ch in ["L", "R"] {
            graph.add_port(&format!("fluidsynth:out_{ch}"), PortDirection::Output);
        }

        for n in 1..=2 {
            graph.insert_port(
                Port::new(PortId::default(), format!("system:capture_{n}"), PortDirection::Output)
                    .with_alias(format!("alsa_pcm:hw:Scarlett:in{n}"))
                    .with_pretty_name(format!("Scarlett 2i2:capture_{n}")),
            );
            graph.insert_port(
                Port::new(PortId::default(), format!("system:playback_{n}"), PortDirection::Input)
                    .with_alias(format!("alsa_pcm:hw:Scarlett:out{n}"))
                    .with_pretty_name(format!("Scarlett 2i2:playback_{n}")),
            );
        }

        graph.add_port("drumkv1:out_1", PortDirection::Output);
        graph.add_port("ardour:Audio 1/audio_in 1", PortDirection::Input);
        graph.add_port("ardour:Audio 1/audio_in 2", PortDirection::Input);

        graph.add_port("a2j:Keystep [24] (capture): Keystep MIDI 1", PortDirection::Output);
        graph.add_port("fluidsynth:midi_00", PortDirection::Input);

        Self { graph }
    }

    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            client_name: "autopatch-test".to_string(),
            connect_interval: Duration::from_millis(500),
            max_attempts: 0,
            poll_interval: Duration::from_millis(20),
            reconnect: true,
        }
    }

    pub fn linked(&self, output: &str, input: &str) -> bool {
        self.graph.is_linked(output, input)
    }
}

/// Poll `check` on the (possibly paused) tokio clock until it holds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
