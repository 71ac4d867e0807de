// Record -> persisted line
//
// Column order is positional and fixed:
//   user_name | id | traffic_usage | ip | port | mac
// Consumers read by position, never by name.

use std::borrow::Cow;

use crate::Record;

pub const FIELD_DELIMITER: char = '|';

/// Serialize a record into its single-line textual form.
///
/// Field values are escaped so the delimiter never appears bare inside a field
/// and a record never spans two physical lines. Values without `\`, `|`, `\n`
/// or `\r` are emitted verbatim.
pub fn serialize(record: &Record) -> String {
    let id = record.id.to_string();
    let usage = record.traffic_usage.to_string();
    let fields = [
        escape_field(&record.user_name),
        Cow::Borrowed(id.as_str()),
        Cow::Borrowed(usage.as_str()),
        escape_field(&record.ip),
        escape_field(&record.port),
        escape_field(&record.mac),
    ];

    let mut line = String::with_capacity(fields.iter().map(|f| f.len() + 1).sum());
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(FIELD_DELIMITER);
        }
        line.push_str(field);
    }
    line
}

fn escape_field(value: &str) -> Cow<'_, str> {
    const SPECIAL: [char; 4] = ['\\', FIELD_DELIMITER, '\n', '\r'];

    if !value.contains(SPECIAL) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            FIELD_DELIMITER => escaped.push_str("\\|"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_joined_in_fixed_order() {
        let record = Record::new("armin", 42, 730, "192.168.1.4", "443", "00:1b:44:11:3a:b7");
        assert_eq!(
            serialize(&record),
            "armin|42|730|192.168.1.4|443|00:1b:44:11:3a:b7"
        );
    }

    #[test]
    fn serialization_is_deterministic() {
        let record = Record::new("u", 1, 5, "ip", "p", "m");
        assert_eq!(serialize(&record), serialize(&record.clone()));
    }

    #[test]
    fn delimiter_and_newlines_inside_fields_are_escaped() {
        let record = Record::new("a|b", 1, 2, "x\ny", "c\\d", "");
        let line = serialize(&record);
        assert_eq!(line, "a\\|b|1|2|x\\ny|c\\\\d|");
        assert!(!line.contains('\n'));
        // Unescaped delimiters still split into exactly six columns.
        let bare = line.replace("\\\\", "").replace("\\|", "");
        assert_eq!(bare.split(FIELD_DELIMITER).count(), 6);
    }

    #[test]
    fn empty_fields_keep_their_column() {
        let record = Record::new("", 0, 0, "", "", "");
        assert_eq!(serialize(&record), "|0|0|||");
    }
}
