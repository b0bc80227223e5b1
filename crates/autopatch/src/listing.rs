//! One-shot listing of ports and connections.

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;

use crate::graph::{Connection, GraphError, GraphSession, Port, PortDirection};

/// What to list and which name forms to include.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub inputs: bool,
    pub outputs: bool,
    pub connections: bool,
    pub aliases: bool,
    pub pretty_names: bool,
}

impl ListOptions {
    pub fn any(&self) -> bool {
        self.inputs || self.outputs || self.connections
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Listing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<Port>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<Port>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections: Option<Vec<Connection>>,
}

impl Listing {
    pub fn collect(session: &dyn GraphSession, options: &ListOptions) -> Result<Self, GraphError> {
        let ports = |direction| -> Result<Vec<Port>, GraphError> {
            let mut ports = session.ports(direction)?;
            ports.sort_by(|a, b| a.canonical_name.cmp(&b.canonical_name));
            for port in &mut ports {
                if !options.aliases {
                    port.aliases.clear();
                }
                if !options.pretty_names {
                    port.pretty_name = None;
                }
            }
            Ok(ports)
        };

        let mut listing = Listing::default();
        if options.outputs {
            listing.outputs = Some(ports(PortDirection::Output)?);
        }
        if options.inputs {
            listing.inputs = Some(ports(PortDirection::Input)?);
        }
        if options.connections {
            let mut connections = session.connections()?;
            connections.sort();
            listing.connections = Some(connections);
        }
        Ok(listing)
    }

    /// Canonical names flush left, extra names indented underneath.
    pub fn write_text(&self, out: &mut impl Write) -> io::Result<()> {
        for port in self.outputs.iter().chain(self.inputs.iter()).flatten() {
            writeln!(out, "{}", port.canonical_name)?;
            for name in port.match_names().skip(1) {
                writeln!(out, "    {}", name)?;
            }
        }

        if let Some(connections) = &self.connections {
            let mut by_output: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for c in connections {
                by_output
                    .entry(c.output.as_str())
                    .or_default()
                    .push(c.input.as_str());
            }
            for (output, inputs) in by_output {
                writeln!(out, "{}", output)?;
                for input in inputs {
                    writeln!(out, "    -> {}", input)?;
                }
            }
        }
        Ok(())
    }

    pub fn write_json(&self, out: &mut impl Write) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(&mut *out, self)?;
        writeln!(out).map_err(serde_json::Error::io)
    }
}
