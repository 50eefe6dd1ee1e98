use serde::{Deserialize, Serialize};

use crate::tile::TileKey;

/// One availability push for a single tile, as sent on the grid update stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileUpdate {
    #[serde(rename = "M")]
    pub layer: i32,
    #[serde(rename = "X")]
    pub x: i32,
    #[serde(rename = "Y")]
    pub y: i32,
    #[serde(rename = "Z")]
    pub z: i32,
    #[serde(rename = "T")]
    pub token: i64,
}

impl TileUpdate {
    pub const fn key(&self) -> TileKey {
        TileKey::new(self.layer, self.x, self.y, self.z)
    }
}

/// Decode one stream message. The server flushes a (possibly empty) array per tick.
pub fn parse_tile_batch(data: &str) -> Result<Vec<TileUpdate>, serde_json::Error> {
    let batch: Option<Vec<TileUpdate>> = serde_json::from_str(data)?;
    Ok(batch.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_batch() {
        let batch =
            parse_tile_batch(r#"[{"M":2,"X":-3,"Y":7,"Z":0,"T":1712345678},{"M":2,"X":0,"Y":0,"Z":5,"T":-1}]"#)
                .expect("batch should parse");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].key(), TileKey::new(2, -3, 7, 0));
        assert_eq!(batch[0].token, 1_712_345_678);
        assert_eq!(batch[1].token, -1);
    }

    #[test]
    fn null_batch_is_empty() {
        assert!(parse_tile_batch("null").expect("null parses").is_empty());
        assert!(parse_tile_batch("[]").expect("empty parses").is_empty());
    }

    #[test]
    fn malformed_batch_is_an_error() {
        assert!(parse_tile_batch(r#"[{"M":"two"}]"#).is_err());
    }
}
