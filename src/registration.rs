// Image registration control points
//
// Points are (image index, x, y) rows. A point file is an SQLite database
// holding them in a single `points` table.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the table holding the points
pub const POINTS_TABLE: &str = "points";

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Point file not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RegistrationError>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Which image of the registration pair the point belongs to
    pub image_index: u32,
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(image_index: u32, x: f64, y: f64) -> Self {
        Self { image_index, x, y }
    }
}

/// Ordered collection of control points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointSet {
    pub points: Vec<Point>,
}

impl PointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points belonging to one image, in insertion order
    pub fn for_image(&self, image_index: u32) -> impl Iterator<Item = &Point> {
        self.points.iter().filter(move |p| p.image_index == image_index)
    }

    /// Clear the points of one image, or of every image when `image_index`
    /// is `None`. Returns how many points were removed.
    pub fn reset(&mut self, image_index: Option<u32>) -> usize {
        let before = self.points.len();
        match image_index {
            Some(index) => self.points.retain(|p| p.image_index != index),
            None => self.points.clear(),
        }
        before - self.points.len()
    }

    /// Write the points to `path`, replacing any points already stored there
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(path)?;
        init_schema(&conn)?;

        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM {}", POINTS_TABLE), [])?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (position, image_index, x, y) VALUES (?1, ?2, ?3, ?4)",
                POINTS_TABLE
            ))?;
            for (position, point) in self.points.iter().enumerate() {
                stmt.execute(params![position as i64, point.image_index, point.x, point.y])?;
            }
        }
        tx.commit()?;

        log::info!("Saved {} point(s) to {}", self.points.len(), path.display());
        Ok(())
    }

    /// Read the points stored in `path`
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RegistrationError::NotFound(path.display().to_string()));
        }

        let conn = Connection::open(path)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT image_index, x, y FROM {} ORDER BY position",
            POINTS_TABLE
        ))?;
        let points = stmt
            .query_map([], |row| {
                Ok(Point {
                    image_index: row.get(0)?,
                    x: row.get(1)?,
                    y: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        log::debug!("Loaded {} point(s) from {}", points.len(), path.display());
        Ok(Self { points })
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            position INTEGER PRIMARY KEY,
            image_index INTEGER NOT NULL,
            x REAL NOT NULL,
            y REAL NOT NULL
        );
        "#,
        POINTS_TABLE
    ))?;
    Ok(())
}
