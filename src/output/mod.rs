use colored::Colorize;
use regex::Regex;
use serde_json::json;

use crate::dissect::FrameReport;
use crate::protocol::CarriedEap;
use crate::session::SessionSummary;

pub struct Formatter {
    json: bool,
    hex: bool,
    quiet: bool,
}

impl Formatter {
    pub fn new(json: bool, hex: bool, quiet: bool) -> Self {
        Formatter { json, hex, quiet }
    }

    pub fn print_frame(
        &self,
        carried: &CarriedEap,
        report: &FrameReport,
        identity: Option<&str>,
        pattern: &Option<Regex>,
    ) {
        if self.json {
            self.print_frame_json(carried, report, identity);
        } else {
            self.print_frame_text(carried, report, identity, pattern);
        }
    }

    fn print_frame_text(
        &self,
        carried: &CarriedEap,
        report: &FrameReport,
        identity: Option<&str>,
        pattern: &Option<Regex>,
    ) {
        if !self.quiet {
            eprintln!("{}", frame_headline(carried, report, identity));
        }

        for line in report.tree.render().lines() {
            print_tree_line(line, pattern);
        }

        if self.hex
            && let Some(message) = &report.reassembled
        {
            print_hex(&message.bytes);
        }
    }

    fn print_frame_json(&self, carried: &CarriedEap, report: &FrameReport, identity: Option<&str>) {
        let mut j = json!({
            "type": "frame",
            "carriage": carried.carriage,
            "src": carried.src,
            "dst": carried.dst,
            "conversation_key": carried.key.to_string(),
            "identity": identity,
            "report": report,
        });
        if let Some(message) = &report.reassembled {
            j["reassembled"] = json!({
                "reassembly_id": message.reassembly_id,
                "length": message.bytes.len(),
                "declared_length": message.declared_length,
                "fragments": message.fragments,
            });
        }
        println!("{}", j);
    }

    pub fn print_summary(&self, summary: &SessionSummary) {
        if self.json {
            let j = json!({
                "type": "summary",
                "conversations": summary.conversations,
                "incomplete_reassemblies": summary.incomplete_reassemblies,
            });
            println!("{}", j);
            return;
        }

        println!("{}", "Conversations".cyan().bold());
        for conv in &summary.conversations {
            let outcome = match conv.outcome {
                Some(code) => code.to_string(),
                None => "no outcome".to_string(),
            };
            let method = conv
                .method
                .map(crate::eap::type_name)
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} {} depth {} first frame {}, {} frames, identity {}, method {}, {}",
                conv.id.to_string().bold(),
                conv.key.to_string().green(),
                conv.depth,
                conv.first_frame,
                conv.frames,
                conv.identity.as_deref().unwrap_or("-").yellow(),
                method,
                outcome
            );
        }

        if !summary.incomplete_reassemblies.is_empty() {
            println!("{}", "Incomplete reassemblies".red().bold());
            for r in &summary.incomplete_reassemblies {
                let frames: Vec<String> = r
                    .fragments
                    .iter()
                    .map(|f| format!("#{}({}B)", f.frame, f.len))
                    .collect();
                let received: usize = r.fragments.iter().map(|f| f.len).sum();
                let declared = r
                    .declared_length
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "  {} {}/{} bytes: {}",
                    r.reassembly_id,
                    received,
                    declared,
                    frames.join(" ")
                );
            }
        }
    }
}

/// One-line summary printed above the tree.
pub fn frame_headline(carried: &CarriedEap, report: &FrameReport, identity: Option<&str>) -> String {
    let code = report
        .code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "?".to_string());
    let method = report
        .method
        .map(crate::eap::type_name)
        .unwrap_or_default();
    let mut line = format!(
        "{} {} {} {} {} {} id={} {}",
        format!("#{}", report.frame).bold(),
        carried.carriage.label().blue(),
        carried.src.green(),
        "->".dimmed(),
        carried.dst.yellow(),
        code.cyan(),
        report.identifier.map(|i| i.to_string()).unwrap_or_default(),
        method
    );
    if let Some(id) = identity {
        line.push_str(&format!(" [{}]", id.magenta()));
    }
    if report.retransmission {
        line.push_str(&format!(" {}", "RETRANSMISSION".yellow()));
    }
    if let Some(slot) = report.fragment {
        line.push_str(&format!(" frag {}:{}", slot.reassembly_id, slot.sequence));
    }
    line
}

fn print_tree_line(line: &str, pattern: &Option<Regex>) {
    let trimmed = line.trim_start();
    if trimmed.starts_with("[Error]") {
        println!("{}", line.red());
    } else if trimmed.starts_with("[Warning]") {
        println!("{}", line.yellow());
    } else if trimmed.starts_with("[Note]") {
        println!("{}", line.dimmed());
    } else {
        print_highlighted(line, pattern);
    }
}

/// Print payload with regex matches highlighted in red.
fn print_highlighted(text: &str, pattern: &Option<Regex>) {
    match pattern {
        Some(re) => {
            let mut last = 0;
            for m in re.find_iter(text) {
                print!("{}", &text[last..m.start()]);
                print!("{}", text[m.start()..m.end()].red().bold());
                last = m.end();
            }
            println!("{}", &text[last..]);
        }
        None => println!("{}", text),
    }
}

/// Hex + ASCII dump, 16 bytes per row.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in data.chunks(16).enumerate() {
        out.push_str(&format!("{:08x}  ", i * 16));
        for (j, byte) in chunk.iter().enumerate() {
            out.push_str(&format!("{:02x} ", byte));
            if j == 7 {
                out.push(' ');
            }
        }
        for _ in chunk.len()..16 {
            out.push_str("   ");
        }
        if chunk.len() <= 8 {
            out.push(' ');
        }
        out.push_str(" |");
        for byte in chunk {
            if byte.is_ascii_graphic() || *byte == b' ' {
                out.push(*byte as char);
            } else {
                out.push('.');
            }
        }
        out.push_str("|\n");
    }
    out
}

fn print_hex(data: &[u8]) {
    print!("{}", hex_dump(data));
}
