//! Parsing of the `poll` command family.
//!
//! ```text
//! poll [limited <N>] [hidden] <title> [[emoji] choice ...]
//! poll end <id>
//! poll result <id>
//! poll help
//! ```
//!
//! Arguments are split on whitespace; double quotes group words into one
//! argument.

use crate::{
    domain::PollId,
    poll::model::{NewChoice, MAX_CHOICES},
    Error, Result,
};

const YES: &str = "\u{2B55}";
const NO: &str = "\u{274C}";
const REGIONAL_INDICATOR_A: u32 = 0x1F1E6;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollCommand {
    Create(PollRequest),
    End(PollId),
    Result(PollId),
    Help,
}

/// A poll as typed by the user, before it is bound to a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollRequest {
    pub title: String,
    pub choices: Vec<NewChoice>,
    pub limit: Option<u32>,
    pub hidden: bool,
}

/// Parse the arguments following `poll`.
pub fn parse(args: &str) -> Result<PollCommand> {
    let tokens = tokenize(args)?;
    let Some(first) = tokens.first() else {
        return Ok(PollCommand::Help);
    };

    match first.to_lowercase().as_str() {
        "help" if tokens.len() == 1 => return Ok(PollCommand::Help),
        "end" => return parse_id(&tokens[1..]).map(PollCommand::End),
        "result" => return parse_id(&tokens[1..]).map(PollCommand::Result),
        _ => {}
    }

    let mut rest = &tokens[..];
    let mut limit = None;
    if rest[0].eq_ignore_ascii_case("limited") {
        let n = rest
            .get(1)
            .ok_or_else(|| invalid("`limited` needs a number"))?;
        let n: u32 = n
            .parse()
            .map_err(|_| invalid(format!("`{n}` is not a valid vote limit")))?;
        if n == 0 {
            return Err(invalid("the vote limit must be at least 1"));
        }
        limit = Some(n);
        rest = &rest[2..];
    }

    let mut hidden = false;
    if rest.first().is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
        hidden = true;
        rest = &rest[1..];
    }

    let Some((title, args)) = rest.split_first() else {
        return Err(invalid("the poll needs a title"));
    };

    Ok(PollCommand::Create(PollRequest {
        title: title.clone(),
        choices: parse_choices(args)?,
        limit,
        hidden,
    }))
}

fn parse_id(tokens: &[String]) -> Result<PollId> {
    match tokens {
        [id] => id
            .trim_start_matches('#')
            .parse::<i64>()
            .map(PollId)
            .map_err(|_| invalid(format!("`{id}` is not a poll id"))),
        _ => Err(invalid("expected exactly one poll id")),
    }
}

/// Turn the tokens after the title into choices.
pub fn parse_choices(args: &[String]) -> Result<Vec<NewChoice>> {
    if args.is_empty() {
        return Ok(vec![NewChoice::new(YES, YES), NewChoice::new(NO, NO)]);
    }

    let emoji_flags: Vec<bool> = args.iter().map(|a| is_emoji(a)).collect();

    let choices: Vec<NewChoice> = if emoji_flags.iter().all(|e| *e) {
        args.iter().map(|e| NewChoice::new(e.as_str(), e.as_str())).collect()
    } else if emoji_flags.iter().all(|e| !*e) {
        if args.len() > MAX_CHOICES {
            return Err(too_many());
        }
        args.iter()
            .enumerate()
            .map(|(i, value)| NewChoice::new(letter(i), value.as_str()))
            .collect()
    } else {
        let pairs_ok = args.len() % 2 == 0
            && emoji_flags
                .chunks(2)
                .all(|pair| pair[0] && !pair[1]);
        if !pairs_ok {
            return Err(invalid(
                "mix emoji and choices as strict `emoji choice` pairs",
            ));
        }
        args.chunks(2)
            .map(|pair| NewChoice::new(pair[0].as_str(), pair[1].as_str()))
            .collect()
    };

    if choices.len() > MAX_CHOICES {
        return Err(too_many());
    }
    Ok(choices)
}

/// Regional indicator letter for position `i` (0 → 🇦).
fn letter(i: usize) -> String {
    char::from_u32(REGIONAL_INDICATOR_A + i as u32)
        .map(String::from)
        .unwrap_or_default()
}

/// Whether `token` looks like a single emoji (possibly a ZWJ or flag sequence).
pub fn is_emoji(token: &str) -> bool {
    let mut chars = token.chars().peekable();
    let Some(&first) = chars.peek() else {
        return false;
    };

    // Keycaps: 1️⃣ #️⃣ *️⃣
    if (first.is_ascii_digit() || first == '#' || first == '*') && token.contains('\u{20E3}') {
        return token
            .chars()
            .skip(1)
            .all(|c| c == '\u{FE0F}' || c == '\u{20E3}');
    }

    let mut pictographic = false;
    for c in token.chars() {
        match c {
            '\u{FE0F}' | '\u{200D}' | '\u{E0020}'..='\u{E007F}' | '\u{1F3FB}'..='\u{1F3FF}' => {}
            '\u{00A9}' | '\u{00AE}' | '\u{203C}' | '\u{2049}' | '\u{2122}' | '\u{2139}'
            | '\u{2194}'..='\u{21AA}'
            | '\u{231A}'..='\u{23FF}'
            | '\u{24C2}'
            | '\u{25AA}'..='\u{27BF}'
            | '\u{2934}' | '\u{2935}'
            | '\u{2B05}'..='\u{2B55}'
            | '\u{3030}' | '\u{303D}' | '\u{3297}' | '\u{3299}'
            | '\u{1F000}'..='\u{1FAFF}' => pictographic = true,
            _ => return false,
        }
    }
    pictographic
}

fn tokenize(input: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut quoted = false;

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !cur.is_empty() || quoted {
                    tokens.push(std::mem::take(&mut cur));
                }
                quoted = false;
            }
            c => cur.push(c),
        }
    }
    if in_quotes {
        return Err(invalid("unclosed quote"));
    }
    if !cur.is_empty() || quoted {
        tokens.push(cur);
    }
    Ok(tokens)
}

fn too_many() -> Error {
    invalid(format!("at most {MAX_CHOICES} choices are allowed"))
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidPoll(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(args: &str) -> PollRequest {
        match parse(args).unwrap() {
            PollCommand::Create(req) => req,
            other => panic!("expected create, got {other:?}"),
        }
    }

    fn pairs(req: &PollRequest) -> Vec<(&str, &str)> {
        req.choices
            .iter()
            .map(|c| (c.emoji.as_str(), c.value.as_str()))
            .collect()
    }

    #[test]
    fn title_only_is_yes_no() {
        let req = create("Is a strawberry a fruit?");
        assert_eq!(req.title, "Is");
        let req = create("\"Is a strawberry a fruit?\"");
        assert_eq!(req.title, "Is a strawberry a fruit?");
        assert_eq!(pairs(&req), vec![("⭕", "⭕"), ("❌", "❌")]);
    }

    #[test]
    fn plain_choices_get_letters() {
        let req = create("Fruit apple orange strawberry");
        assert_eq!(
            pairs(&req),
            vec![("🇦", "apple"), ("🇧", "orange"), ("🇨", "strawberry")]
        );
        assert_eq!(req.limit, None);
        assert!(!req.hidden);
    }

    #[test]
    fn emoji_only_choices_are_their_own_value() {
        let req = create("Cats 😸 😻 😹");
        assert_eq!(pairs(&req), vec![("😸", "😸"), ("😻", "😻"), ("😹", "😹")]);
    }

    #[test]
    fn emoji_pairs_with_limit_and_hidden() {
        let req = create("limited 2 hidden North 🇮🇹 Italy 🇬🇧 Britain 🇩🇪 Germany");
        assert_eq!(req.limit, Some(2));
        assert!(req.hidden);
        assert_eq!(req.title, "North");
        assert_eq!(
            pairs(&req),
            vec![("🇮🇹", "Italy"), ("🇬🇧", "Britain"), ("🇩🇪", "Germany")]
        );
    }

    #[test]
    fn broken_pairs_are_rejected() {
        assert!(parse("Food 🍣 sushi ramen").is_err());
        assert!(parse("Food 🍣 sushi 🍜").is_err());
        assert!(parse("Food sushi 🍣").is_err());
    }

    #[test]
    fn limit_must_be_positive_number() {
        assert!(parse("limited 0 Title a b").is_err());
        assert!(parse("limited x Title a b").is_err());
        assert!(parse("limited").is_err());
        assert!(parse("limited 1").is_err());
    }

    #[test]
    fn at_most_twenty_choices() {
        let ok: Vec<String> = (0..20).map(|i| format!("c{i}")).collect();
        let req = create(&format!("T {}", ok.join(" ")));
        assert_eq!(req.choices.last().unwrap().emoji, "🇹");

        let too_many: Vec<String> = (0..21).map(|i| format!("c{i}")).collect();
        assert!(parse(&format!("T {}", too_many.join(" "))).is_err());
    }

    #[test]
    fn end_result_and_help() {
        assert_eq!(parse("end 12").unwrap(), PollCommand::End(PollId(12)));
        assert_eq!(parse("RESULT #3").unwrap(), PollCommand::Result(PollId(3)));
        assert_eq!(parse("help").unwrap(), PollCommand::Help);
        assert_eq!(parse("   ").unwrap(), PollCommand::Help);
        assert!(parse("end").is_err());
        assert!(parse("end soon").is_err());
    }

    #[test]
    fn emoji_detection() {
        for e in ["😸", "❤️", "👍🏽", "🇯🇵", "1️⃣", "👨‍👩‍👧", "⭕", "❌"] {
            assert!(is_emoji(e), "{e}");
        }
        for t in ["a", "1", "apple", "😸cat", "", "#"] {
            assert!(!is_emoji(t), "{t}");
        }
    }

    #[test]
    fn quotes_group_words() {
        let req = create("\"Team lunch\" 🍣 \"raw fish\" 🍜 \"\"");
        assert_eq!(pairs(&req), vec![("🍣", "raw fish"), ("🍜", "")]);
        assert!(parse("\"unterminated").is_err());
    }
}
