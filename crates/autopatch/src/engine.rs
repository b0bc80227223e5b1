//! Reconciliation: pattern set × port snapshot → connection intents
//!
//! Pure over its inputs. The only I/O is taking the port snapshot in
//! [`MatchEngine::refresh`]; connecting is left to the applier.

use std::collections::HashSet;

use tracing::{debug, error, trace};

use crate::graph::{ConnectionIntent, GraphError, GraphSession, Port, PortDirection};
use crate::pattern::{Matcher, PatternSet};

pub struct MatchEngine;

impl MatchEngine {
    /// Match every pattern pair against the given ports, in declaration
    /// order. Emits every (output, input) combination once.
    pub fn reconcile(patterns: &PatternSet, outputs: &[Port], inputs: &[Port]) -> Vec<ConnectionIntent> {
        let mut seen = HashSet::new();
        let mut intents = Vec::new();

        for pattern in patterns.iter() {
            for output in outputs {
                // every matching name form is its own candidate
                let mut rendered_forms: Vec<String> = Vec::new();
                for name in output.match_names() {
                    trace!("Match '{}' on output '{}'", pattern.output_text(), name);
                    if let Some(subs) = pattern.output().match_name(name) {
                        let rendered = pattern.render_input(&subs);
                        if !rendered_forms.contains(&rendered) {
                            rendered_forms.push(rendered);
                        }
                    }
                }
                if rendered_forms.is_empty() {
                    continue;
                }

                debug!("Found matching output port: {}", output.canonical_name);

                for rendered in &rendered_forms {
                    let input_matcher = match Matcher::compile(rendered, patterns.exact()) {
                        Ok(matcher) => matcher,
                        Err(e) => {
                            error!("Error in input port pattern for '{}': {}", output.canonical_name, e);
                            continue;
                        }
                    };

                    for input in inputs {
                        if input.match_names().any(|name| input_matcher.is_match(name)) {
                            debug!("Found matching input port: {}", input.canonical_name);
                            let intent = ConnectionIntent::new(&output.canonical_name, &input.canonical_name);
                            if seen.insert(intent.clone()) {
                                intents.push(intent);
                            }
                        }
                    }
                }
            }
        }

        intents
    }

    /// Snapshot the session's ports and reconcile against them.
    pub fn refresh(
        session: &dyn GraphSession,
        patterns: &PatternSet,
    ) -> Result<Vec<ConnectionIntent>, GraphError> {
        if patterns.is_empty() {
            return Ok(Vec::new());
        }

        let outputs = session.ports(PortDirection::Output)?;
        let inputs = session.ports(PortDirection::Input)?;
        let intents = Self::reconcile(patterns, &outputs, &inputs);

        debug!(
            "Reconciled {} outputs x {} inputs against {} patterns: {} intents",
            outputs.len(),
            inputs.len(),
            patterns.len(),
            intents.len()
        );
        Ok(intents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PortId;
    use pretty_assertions::assert_eq;

    fn output(id: u32, name: &str) -> Port {
        Port::new(PortId(id), name, PortDirection::Output)
    }

    fn input(id: u32, name: &str) -> Port {
        Port::new(PortId(id), name, PortDirection::Input)
    }

    fn intent(o: &str, i: &str) -> ConnectionIntent {
        ConnectionIntent::new(o, i)
    }

    fn set(exact: bool, pairs: &[&str]) -> PatternSet {
        let mut set = PatternSet::new(exact);
        set.add_pairs(pairs);
        set
    }

    #[test]
    fn test_capture_substitution_selects_matching_input() {
        let patterns = set(false, &[r"system:out_(?P<n>\d+)", "system:in_{n}"]);
        let outputs = vec![output(1, "system:out_3")];
        let inputs = vec![input(2, "system:in_3"), input(3, "system:in_4")];

        let intents = MatchEngine::reconcile(&patterns, &outputs, &inputs);
        assert_eq!(intents, vec![intent("system:out_3", "system:in_3")]);
    }

    #[test]
    fn test_cartesian_product_per_pattern() {
        let patterns = set(false, &["synth:", "mixer:in"]);
        let outputs = vec![
            output(1, "synth:L"),
            output(2, "synth:R"),
            output(3, "drums:out"),
        ];
        let inputs = vec![
            input(4, "mixer:in_1"),
            input(5, "mixer:in_2"),
            input(6, "system:playback_1"),
        ];

        let intents = MatchEngine::reconcile(&patterns, &outputs, &inputs);
        assert_eq!(
            intents,
            vec![
                intent("synth:L", "mixer:in_1"),
                intent("synth:L", "mixer:in_2"),
                intent("synth:R", "mixer:in_1"),
                intent("synth:R", "mixer:in_2"),
            ]
        );
    }

    #[test]
    fn test_overlapping_patterns_are_deduplicated() {
        let patterns = set(false, &["synth:L", "mixer:in_1", "synth:", "mixer:in_1"]);
        let outputs = vec![output(1, "synth:L")];
        let inputs = vec![input(2, "mixer:in_1")];

        let intents = MatchEngine::reconcile(&patterns, &outputs, &inputs);
        assert_eq!(intents, vec![intent("synth:L", "mixer:in_1")]);
    }

    #[test]
    fn test_alias_and_pretty_name_match_but_canonical_is_emitted() {
        let patterns = set(false, &["alsa_pcm:capture", "Speakers:"]);
        let outputs = vec![output(1, "system:capture_1").with_alias("alsa_pcm:capture_1")];
        let inputs = vec![input(2, "system:playback_1").with_pretty_name("Speakers:left")];

        let intents = MatchEngine::reconcile(&patterns, &outputs, &inputs);
        assert_eq!(intents, vec![intent("system:capture_1", "system:playback_1")]);
    }

    #[test]
    fn test_alias_groups_feed_the_template() {
        let patterns = set(false, &[r"hw:(?P<card>\w+):out", "{card}:in"]);
        let outputs = vec![output(1, "client-1:out").with_alias("hw:fx:out")];
        let inputs = vec![input(2, "fx:in"), input(3, "client-1:in")];

        let intents = MatchEngine::reconcile(&patterns, &outputs, &inputs);
        assert_eq!(intents, vec![intent("client-1:out", "fx:in")]);
    }

    #[test]
    fn test_each_matching_name_form_renders_its_own_input() {
        let patterns = set(false, &[r"(?P<dev>\w+):cap_1", "{dev}:in"]);
        let outputs = vec![output(1, "system:cap_1").with_alias("hw:cap_1")];
        let inputs = vec![input(2, "system:in"), input(3, "hw:in"), input(4, "other:in")];

        let intents = MatchEngine::reconcile(&patterns, &outputs, &inputs);
        assert_eq!(
            intents,
            vec![intent("system:cap_1", "system:in"), intent("system:cap_1", "hw:in")]
        );
    }

    #[test]
    fn test_literal_mode_requires_exact_names() {
        let patterns = set(true, &["foo:bar", "sink:in"]);
        let outputs = vec![output(1, "foo:bar"), output(2, "foo:bar_2")];
        let inputs = vec![input(3, "sink:in"), input(4, "sink:in_2")];

        let intents = MatchEngine::reconcile(&patterns, &outputs, &inputs);
        assert_eq!(intents, vec![intent("foo:bar", "sink:in")]);
    }

    #[test]
    fn test_bad_rendered_input_skips_only_that_output() {
        // v = "x(" renders "x(:in", which does not compile
        let patterns = set(false, &["(?P<v>[a-z(]+):out", "{v}:in", "good:out", "good:in"]);
        let outputs = vec![output(1, "x(:out"), output(2, "good:out")];
        let inputs = vec![input(3, "good:in")];

        let intents = MatchEngine::reconcile(&patterns, &outputs, &inputs);
        assert_eq!(intents, vec![intent("good:out", "good:in")]);
    }

    #[test]
    fn test_empty_inputs_yield_nothing() {
        let patterns = set(false, &[".*", ".*"]);
        let intents = MatchEngine::reconcile(&patterns, &[output(1, "a:out")], &[]);
        assert!(intents.is_empty());
    }
}
