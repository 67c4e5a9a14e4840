use crate::Database;
use crate::models::{
    GeoBox, NewUser, SightingFields, SightingPatch, SightingRow, SightingWrite, SpeciesRow, UserRow,
};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, username, password_hash, email, profile_picture";

const SIGHTING_SELECT: &str = "
    SELECT s.id, s.user_id, s.species_id, s.place_guess, s.observed_on, s.description,
           s.photos, s.latitude, s.longitude, u.username, u.profile_picture,
           sp.name, sp.type, sp.scientific_name
    FROM sightings s
    JOIN users u ON u.id = s.user_id
    JOIN species sp ON sp.id = s.species_id";

impl Database {
    // -- Users --

    /// Insert a user and run `attach` inside the same transaction. `attach`
    /// receives the new id and may return a profile-picture path to record;
    /// if it fails, the insert is rolled back.
    pub fn create_user<F>(&self, new: &NewUser<'_>, attach: F) -> Result<UserRow>
    where
        F: FnOnce(i64) -> Result<Option<String>>,
    {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO users (username, password_hash, email) VALUES (?1, ?2, ?3)",
                (new.username, new.password_hash, new.email),
            )?;
            let id = tx.last_insert_rowid();

            if let Some(path) = attach(id)? {
                tx.execute(
                    "UPDATE users SET profile_picture = ?1 WHERE id = ?2",
                    rusqlite::params![path, id],
                )?;
            }

            query_user_by_id(tx, id)?.ok_or_else(|| anyhow!("User {} vanished after insert", id))
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                [username],
                map_user,
            )
            .optional()
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn email_exists(&self, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM users WHERE email = ?1", [email], |r| r.get(0))?;
            Ok(n > 0)
        })
    }

    /// Case-insensitive substring match on username, skipping `exclude_id`.
    pub fn search_users(&self, term: &str, exclude_id: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE instr(lower(username), lower(?1)) > 0 AND id != ?2
                 ORDER BY username"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![term, exclude_id], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Species --

    pub fn list_species(&self) -> Result<Vec<SpeciesRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, type, scientific_name FROM species ORDER BY name")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(SpeciesRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        kind: row.get(2)?,
                        scientific_name: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Sightings --

    /// All sightings, or only those whose coordinates fall inside `bbox`.
    /// Sightings without coordinates never match a box.
    pub fn list_sightings(&self, bbox: Option<GeoBox>) -> Result<Vec<SightingRow>> {
        self.with_conn(|conn| match bbox {
            Some(b) => {
                let mut stmt = conn.prepare(&format!(
                    "{SIGHTING_SELECT}
                     WHERE s.latitude BETWEEN ?1 AND ?2
                       AND s.longitude BETWEEN ?3 AND ?4
                     ORDER BY s.id"
                ))?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![b.min_lat, b.max_lat, b.min_lng, b.max_lng],
                        map_sighting,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            }
            None => {
                let mut stmt = conn.prepare(&format!("{SIGHTING_SELECT} ORDER BY s.id"))?;
                let rows = stmt
                    .query_map([], map_sighting)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            }
        })
    }

    pub fn list_sightings_by_user(&self, user_id: i64) -> Result<Vec<SightingRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SIGHTING_SELECT} WHERE s.user_id = ?1 ORDER BY s.observed_on DESC"
            ))?;
            let rows = stmt
                .query_map([user_id], map_sighting)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_sighting(&self, id: i64) -> Result<Option<SightingRow>> {
        self.with_conn(|conn| query_sighting(conn, id))
    }

    pub fn create_sighting(
        &self,
        user_id: i64,
        fields: &SightingFields,
    ) -> Result<SightingWrite<SightingRow>> {
        self.with_tx(|tx| {
            if !query_species_exists(tx, fields.species_id)? {
                return Ok(SightingWrite::UnknownSpecies);
            }
            tx.execute(
                "INSERT INTO sightings
                    (user_id, species_id, place_guess, observed_on, description, photos, latitude, longitude)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    user_id,
                    fields.species_id,
                    fields.place_guess,
                    fields.observed_on,
                    fields.description,
                    fields.photos,
                    fields.latitude,
                    fields.longitude,
                ],
            )?;
            let id = tx.last_insert_rowid();
            let row = query_sighting(tx, id)?
                .ok_or_else(|| anyhow!("Sighting {} vanished after insert", id))?;
            Ok(SightingWrite::Done(row))
        })
    }

    /// Apply `patch` to sighting `id` if `user_id` owns it. The owner is never
    /// changed.
    pub fn update_sighting(
        &self,
        id: i64,
        user_id: i64,
        patch: SightingPatch,
    ) -> Result<SightingWrite<SightingRow>> {
        self.with_tx(|tx| {
            let current = match owned_sighting(tx, id, user_id)? {
                Ok(row) => row,
                Err(refused) => return Ok(refused),
            };

            let mut fields = current.fields();
            patch.apply(&mut fields);
            if fields.species_id != current.species_id && !query_species_exists(tx, fields.species_id)? {
                return Ok(SightingWrite::UnknownSpecies);
            }

            tx.execute(
                "UPDATE sightings
                 SET species_id = ?1, place_guess = ?2, observed_on = ?3, description = ?4,
                     photos = ?5, latitude = ?6, longitude = ?7
                 WHERE id = ?8",
                rusqlite::params![
                    fields.species_id,
                    fields.place_guess,
                    fields.observed_on,
                    fields.description,
                    fields.photos,
                    fields.latitude,
                    fields.longitude,
                    id,
                ],
            )?;
            let row = query_sighting(tx, id)?
                .ok_or_else(|| anyhow!("Sighting {} vanished after update", id))?;
            Ok(SightingWrite::Done(row))
        })
    }

    pub fn delete_sighting(&self, id: i64, user_id: i64) -> Result<SightingWrite<()>> {
        self.with_tx(|tx| {
            if let Err(refused) = owned_sighting(tx, id, user_id)? {
                return Ok(refused);
            }
            tx.execute("DELETE FROM sightings WHERE id = ?1", [id])?;
            Ok(SightingWrite::Done(()))
        })
    }

    // -- Friendships --

    /// Insert both directed rows of an edge. Returns `false` without writing
    /// if either direction already exists.
    pub fn add_friendship(&self, user_id: i64, friend_id: i64) -> Result<bool> {
        self.with_tx(|tx| {
            if query_friendship_exists(tx, user_id, friend_id)? {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO friendships (user_id, friend_id) VALUES (?1, ?2)",
                [user_id, friend_id],
            )?;
            // A self-edge is its own reverse.
            if user_id != friend_id {
                tx.execute(
                    "INSERT INTO friendships (user_id, friend_id) VALUES (?1, ?2)",
                    [friend_id, user_id],
                )?;
            }
            Ok(true)
        })
    }

    /// Everyone linked to `user_id` by a row in either direction, once each.
    pub fn list_friends(&self, user_id: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE id IN (
                     SELECT friend_id FROM friendships WHERE user_id = ?1
                     UNION
                     SELECT user_id FROM friendships WHERE friend_id = ?1
                 )
                 ORDER BY username"
            ))?;
            let rows = stmt
                .query_map([user_id], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete both directed rows of an edge. Returns how many rows went.
    pub fn remove_friendship(&self, user_id: i64, friend_id: i64) -> Result<usize> {
        self.with_tx(|tx| {
            let n = tx.execute(
                "DELETE FROM friendships
                 WHERE (user_id = ?1 AND friend_id = ?2)
                    OR (user_id = ?2 AND friend_id = ?1)",
                [user_id, friend_id],
            )?;
            Ok(n)
        })
    }

    // -- Sessions --

    /// Store a new session. Expired sessions are pruned and `replaces`, the
    /// caller's previous token hash if any, is dropped in the same transaction.
    pub fn create_session(
        &self,
        token_hash: &str,
        user_id: i64,
        ttl_hours: u64,
        replaces: Option<&str>,
    ) -> Result<()> {
        let ttl_hours =
            i64::try_from(ttl_hours).map_err(|_| anyhow!("Session TTL of {} hours is too large", ttl_hours))?;
        self.with_tx(|tx| {
            tx.execute("DELETE FROM sessions WHERE expires_at <= datetime('now')", [])?;
            if let Some(old) = replaces {
                tx.execute("DELETE FROM sessions WHERE token_hash = ?1", [old])?;
            }
            tx.execute(
                "INSERT INTO sessions (token_hash, user_id, expires_at)
                 VALUES (?1, ?2, datetime('now', '+' || ?3 || ' hours'))",
                rusqlite::params![token_hash, user_id, ttl_hours],
            )?;
            Ok(())
        })
    }

    pub fn get_session_user_id(&self, token_hash: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT user_id FROM sessions WHERE token_hash = ?1 AND expires_at > datetime('now')",
                [token_hash],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn delete_session(&self, token_hash: &str) -> Result<bool> {
        self.with_tx(|tx| {
            let n = tx.execute("DELETE FROM sessions WHERE token_hash = ?1", [token_hash])?;
            Ok(n > 0)
        })
    }
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [id],
        map_user,
    )
    .optional()
}

fn query_sighting(conn: &Connection, id: i64) -> Result<Option<SightingRow>> {
    conn.query_row(&format!("{SIGHTING_SELECT} WHERE s.id = ?1"), [id], map_sighting)
        .optional()
}

/// The sighting if `user_id` owns it, otherwise the refusal to hand back.
fn owned_sighting<T>(
    conn: &Connection,
    id: i64,
    user_id: i64,
) -> Result<std::result::Result<SightingRow, SightingWrite<T>>> {
    Ok(match query_sighting(conn, id)? {
        None => Err(SightingWrite::NotFound),
        Some(row) if row.user_id != user_id => Err(SightingWrite::NotOwner),
        Some(row) => Ok(row),
    })
}

fn query_species_exists(conn: &Connection, id: i64) -> Result<bool> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM species WHERE id = ?1", [id], |r| r.get(0))?;
    Ok(n > 0)
}

fn query_friendship_exists(conn: &Connection, user_id: i64, friend_id: i64) -> Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM friendships
         WHERE (user_id = ?1 AND friend_id = ?2)
            OR (user_id = ?2 AND friend_id = ?1)",
        [user_id, friend_id],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        email: row.get(3)?,
        profile_picture: row.get(4)?,
    })
}

fn map_sighting(row: &Row<'_>) -> rusqlite::Result<SightingRow> {
    Ok(SightingRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        species_id: row.get(2)?,
        place_guess: row.get(3)?,
        observed_on: row.get(4)?,
        description: row.get(5)?,
        photos: row.get(6)?,
        latitude: row.get(7)?,
        longitude: row.get(8)?,
        owner_username: row.get(9)?,
        owner_profile_picture: row.get(10)?,
        species: SpeciesRow {
            id: row.get(2)?,
            name: row.get(11)?,
            kind: row.get(12)?,
            scientific_name: row.get(13)?,
        },
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_constraint_violation;
    use chrono::NaiveDateTime;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn user(db: &Database, name: &str) -> i64 {
        let new = NewUser {
            username: name,
            password_hash: "$argon2id$stub",
            email: None,
        };
        db.create_user(&new, |_| Ok(None)).unwrap().id
    }

    fn fields(species_id: i64, lat: Option<f64>, lng: Option<f64>) -> SightingFields {
        SightingFields {
            species_id,
            place_guess: Some("somewhere".into()),
            observed_on: NaiveDateTime::parse_from_str("2023-06-15T20:30", "%Y-%m-%dT%H:%M").unwrap(),
            description: None,
            photos: None,
            latitude: lat,
            longitude: lng,
        }
    }

    fn firefly(db: &Database) -> i64 {
        db.list_species().unwrap()[0].id
    }

    fn friendship_rows(db: &Database) -> i64 {
        db.with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM friendships", [], |r| r.get(0))?))
            .unwrap()
    }

    #[test]
    fn migrations_seed_reference_species() {
        let species = db().list_species().unwrap();
        assert_eq!(species.len(), 1);
        assert_eq!(species[0].scientific_name, "Photinus pyralis");
    }

    #[test]
    fn duplicate_username_is_a_constraint_violation() {
        let db = db();
        user(&db, "alice");
        let new = NewUser {
            username: "alice",
            password_hash: "x",
            email: None,
        };
        let err = db.create_user(&new, |_| Ok(None)).err().unwrap();
        assert!(is_constraint_violation(&err));
    }

    #[test]
    fn failed_attach_rolls_back_the_user() {
        let db = db();
        let new = NewUser {
            username: "bob",
            password_hash: "x",
            email: Some("bob@example.com"),
        };
        let result = db.create_user(&new, |_| Err(anyhow!("disk full")));
        assert!(result.is_err());
        assert!(db.get_user_by_username("bob").unwrap().is_none());
        assert!(!db.email_exists("bob@example.com").unwrap());
    }

    #[test]
    fn attach_records_profile_picture() {
        let db = db();
        let new = NewUser {
            username: "carol",
            password_hash: "x",
            email: None,
        };
        let row = db
            .create_user(&new, |_| Ok(Some("/static/uploads/carol.png".into())))
            .unwrap();
        assert_eq!(row.profile_picture.as_deref(), Some("/static/uploads/carol.png"));
    }

    #[test]
    fn search_is_case_insensitive_and_skips_requester() {
        let db = db();
        let alice = user(&db, "Alice");
        user(&db, "malice");
        user(&db, "bob");
        let found: Vec<String> = db
            .search_users("ALI", alice)
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(found, vec!["malice".to_string()]);
    }

    #[test]
    fn friendship_is_symmetric_and_removed_in_both_directions() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");

        assert!(db.add_friendship(a, b).unwrap());
        assert_eq!(friendship_rows(&db), 2);
        assert!(db.with_conn(|c| query_friendship_exists(c, b, a)).unwrap());
        assert_eq!(db.list_friends(a).unwrap()[0].id, b);
        assert_eq!(db.list_friends(b).unwrap()[0].id, a);

        // Either direction counts as an existing edge.
        assert!(!db.add_friendship(b, a).unwrap());
        assert_eq!(friendship_rows(&db), 2);

        assert_eq!(db.remove_friendship(b, a).unwrap(), 2);
        assert_eq!(friendship_rows(&db), 0);
        assert!(db.list_friends(a).unwrap().is_empty());
        assert!(db.list_friends(b).unwrap().is_empty());
    }

    #[test]
    fn self_friendship_is_a_single_row() {
        let db = db();
        let a = user(&db, "a");
        assert!(db.add_friendship(a, a).unwrap());
        assert_eq!(friendship_rows(&db), 1);
        assert_eq!(db.list_friends(a).unwrap().len(), 1);
    }

    fn add_sighting(db: &Database, user_id: i64, fields: &SightingFields) -> SightingRow {
        match db.create_sighting(user_id, fields).unwrap() {
            SightingWrite::Done(row) => row,
            _ => panic!("sighting not created"),
        }
    }

    #[test]
    fn bounding_box_filters_sightings() {
        let db = db();
        let a = user(&db, "a");
        let sp = firefly(&db);
        add_sighting(&db, a, &fields(sp, Some(40.7829), Some(-73.9654)));
        add_sighting(&db, a, &fields(sp, Some(40.7829 + 0.009), Some(-73.9654 - 0.009)));
        add_sighting(&db, a, &fields(sp, Some(40.7829 + 0.01), Some(-73.9654)));
        add_sighting(&db, a, &fields(sp, Some(28.08), Some(-82.37)));
        add_sighting(&db, a, &fields(sp, None, None));

        assert_eq!(db.list_sightings(None).unwrap().len(), 5);

        let near: Vec<Option<f64>> = db
            .list_sightings(Some(GeoBox::around(40.7829, -73.9654, 1.0)))
            .unwrap()
            .into_iter()
            .map(|s| s.latitude)
            .collect();
        assert_eq!(near, vec![Some(40.7829), Some(40.7829 + 0.009)]);
    }

    #[test]
    fn unknown_species_writes_nothing() {
        let db = db();
        let a = user(&db, "a");
        let result = db.create_sighting(a, &fields(999, None, None)).unwrap();
        assert!(matches!(result, SightingWrite::UnknownSpecies));
        assert!(db.list_sightings(None).unwrap().is_empty());

        let created = add_sighting(&db, a, &fields(firefly(&db), None, None));
        let patch = SightingPatch {
            species_id: Some(999),
            ..Default::default()
        };
        let result = db.update_sighting(created.id, a, patch).unwrap();
        assert!(matches!(result, SightingWrite::UnknownSpecies));
        assert_eq!(db.get_sighting(created.id).unwrap().unwrap().species_id, created.species_id);
    }

    #[test]
    fn sighting_update_keeps_owner() {
        let db = db();
        let a = user(&db, "a");
        let sp = firefly(&db);
        let mut initial = fields(sp, Some(1.0), Some(2.0));
        initial.description = Some("pond".into());
        let created = add_sighting(&db, a, &initial);

        let patch = SightingPatch {
            description: Some(Some("updated".into())),
            latitude: Some(None),
            ..Default::default()
        };
        let SightingWrite::Done(updated) = db.update_sighting(created.id, a, patch).unwrap() else {
            panic!("update refused");
        };
        assert_eq!(updated.user_id, a);
        assert_eq!(updated.description.as_deref(), Some("updated"));
        assert_eq!(updated.latitude, None);
        assert_eq!(updated.longitude, Some(2.0));
        assert_eq!(updated.observed_on, created.observed_on);
    }

    #[test]
    fn only_the_owner_may_write() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");
        let created = add_sighting(&db, a, &fields(firefly(&db), None, None));

        let patch = SightingPatch {
            description: Some(Some("vandalised".into())),
            ..Default::default()
        };
        assert!(matches!(
            db.update_sighting(created.id, b, patch.clone()).unwrap(),
            SightingWrite::NotOwner
        ));
        assert!(matches!(db.delete_sighting(created.id, b).unwrap(), SightingWrite::NotOwner));
        assert_eq!(db.get_sighting(created.id).unwrap().unwrap().description, None);

        assert!(matches!(db.delete_sighting(created.id, a).unwrap(), SightingWrite::Done(())));
        assert!(matches!(
            db.update_sighting(created.id, a, patch).unwrap(),
            SightingWrite::NotFound
        ));
        assert!(matches!(db.delete_sighting(created.id, a).unwrap(), SightingWrite::NotFound));
    }

    #[test]
    fn oversized_session_ttl_is_an_error() {
        let db = db();
        let a = user(&db, "a");
        assert!(db.create_session("h", a, u64::MAX, None).is_err());
        assert_eq!(db.get_session_user_id("h").unwrap(), None);
    }

    #[test]
    fn sessions_resolve_until_deleted_or_replaced() {
        let db = db();
        let a = user(&db, "a");
        db.create_session("h1", a, 24, None).unwrap();
        assert_eq!(db.get_session_user_id("h1").unwrap(), Some(a));

        db.create_session("h2", a, 24, Some("h1")).unwrap();
        assert_eq!(db.get_session_user_id("h1").unwrap(), None);
        assert_eq!(db.get_session_user_id("h2").unwrap(), Some(a));

        assert!(db.delete_session("h2").unwrap());
        assert!(!db.delete_session("h2").unwrap());
        assert_eq!(db.get_session_user_id("h2").unwrap(), None);
    }

    #[test]
    fn expired_sessions_do_not_resolve() {
        let db = db();
        let a = user(&db, "a");
        db.create_session("stale", a, 0, None).unwrap();
        assert_eq!(db.get_session_user_id("stale").unwrap(), None);
    }
}
