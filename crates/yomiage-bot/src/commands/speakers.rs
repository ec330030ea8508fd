//! Lays the speaker catalog out as embed fields within Discord's limits.

use yomiage_types::Speaker;

use super::EmbedField;

/// Maximum characters in one embed field value.
pub const FIELD_VALUE_LIMIT: usize = 1024;

/// Maximum fields in one embed.
pub const MAX_FIELDS: usize = 25;

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// One `**name**` header line followed by a `style: ID n` line per style.
fn speaker_lines(speaker: &Speaker) -> Vec<String> {
    std::iter::once(format!("**{}**\n", speaker.name))
        .chain(
            speaker
                .styles
                .iter()
                .map(|style| format!("{}: ID {}\n", style.name, style.id)),
        )
        .collect()
}

/// Packs speakers into field values of at most [`FIELD_VALUE_LIMIT`]
/// characters. A speaker stays in one field unless its own block is too
/// long, in which case it is split between style lines.
pub fn pack_speakers(speakers: &[Speaker]) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();

    for speaker in speakers {
        let lines = speaker_lines(speaker);
        let block: String = lines.concat();

        if char_len(&current) + char_len(&block) <= FIELD_VALUE_LIMIT {
            current.push_str(&block);
            continue;
        }
        if !current.is_empty() {
            values.push(std::mem::take(&mut current));
        }
        if char_len(&block) <= FIELD_VALUE_LIMIT {
            current = block;
            continue;
        }

        for line in lines {
            let line: String = line.chars().take(FIELD_VALUE_LIMIT).collect();
            if char_len(&current) + char_len(&line) > FIELD_VALUE_LIMIT {
                values.push(std::mem::take(&mut current));
            }
            current.push_str(&line);
        }
    }

    if !current.is_empty() {
        values.push(current);
    }
    values
}

/// Numbered `話者リスト (n)` fields, capped at [`MAX_FIELDS`].
pub fn speaker_fields(speakers: &[Speaker]) -> Vec<EmbedField> {
    let values = pack_speakers(speakers);
    if values.len() > MAX_FIELDS {
        tracing::warn!(
            fields = values.len(),
            limit = MAX_FIELDS,
            "speaker list truncated to embed field limit"
        );
    }
    values
        .into_iter()
        .take(MAX_FIELDS)
        .enumerate()
        .map(|(i, value)| EmbedField {
            name: format!("話者リスト ({})", i + 1),
            value,
        })
        .collect()
}
