//! Operator console line parser.
//!
//! | Line | Command |
//! |---|---|
//! | `w` `a` `s` `d` `q` `e` `x` (or `forward`, `left`, …, `stop`) | manual preset |
//! | `auto` / `manual` | switch control mode |
//! | `wp x,y,z` | append a route waypoint |
//! | `clear` | drop every waypoint |
//! | `status` | print link and map status |
//! | `help` | list commands |
//! | `quit` | stop the station |

use abyss_runtime::{ManualInput, parse_waypoint};
use abyss_types::{ControlMode, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorCommand {
    Manual(ManualInput),
    Mode(ControlMode),
    Waypoint(Vec3),
    ClearRoute,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
  w/s          forward / backward
  a/d          left / right
  q/e          ascend / descend
  x            stop thrusters
  auto         follow the route
  manual       back to manual control
  wp x,y,z     add a waypoint
  clear        clear the route
  status       link and map status
  quit         stop the station";

/// Parse one console line.  Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<OperatorCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let command = match head.to_ascii_lowercase().as_str() {
        "auto" => OperatorCommand::Mode(ControlMode::Auto),
        "manual" => OperatorCommand::Mode(ControlMode::Manual),
        "wp" | "waypoint" => {
            if rest.is_empty() {
                return Err("usage: wp x,y,z".to_string());
            }
            OperatorCommand::Waypoint(parse_waypoint(rest).map_err(|e| e.to_string())?)
        }
        "clear" => OperatorCommand::ClearRoute,
        "status" => OperatorCommand::Status,
        "help" | "?" => OperatorCommand::Help,
        "quit" | "exit" => OperatorCommand::Quit,
        _ => OperatorCommand::Manual(line.parse::<ManualInput>().map_err(|e| e.to_string())?),
    };
    Ok(Some(command))
}
