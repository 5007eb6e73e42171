use std::{fmt, str::FromStr};

use chrono::{NaiveDate, NaiveDateTime};
use diesel::{
    deserialize::{self, FromSql, FromSqlRow},
    expression::AsExpression,
    pg::{Pg, PgValue},
    prelude::*,
    serialize::{self, Output, ToSql},
    sql_types::Text,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

/// Generates the string mapping shared by the enums stored as VARCHAR columns.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                raw.parse().map_err(Into::into)
            }
        }
    };
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    Public,
    Follower,
    #[default]
    Private,
}

text_enum!(Visibility, "visibility", {
    Public => "PUBLIC",
    Follower => "FOLLOWER",
    Private => "PRIVATE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageSource {
    /// Freshly uploaded from the device gallery.
    Gallery,
    /// Picked from the user's existing archive.
    Archive,
}

text_enum!(ImageSource, "image source", {
    Gallery => "GALLERY",
    Archive => "ARCHIVE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecapStatus {
    Waiting,
    Generated,
}

text_enum!(RecapStatus, "recap status", {
    Waiting => "WAITING",
    Generated => "GENERATED",
});

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = diaries)]
pub struct Diary {
    pub id: i64,
    pub user_id: i64,
    pub pet_id: i64,
    pub title: Option<String>,
    pub content: Option<String>,
    pub diary_date: NaiveDate,
    pub visibility: Visibility,
    pub is_ai_gen: bool,
    pub weather: Option<String>,
    pub mood: Option<String>,
    pub location_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = diaries)]
pub struct NewDiary {
    pub user_id: i64,
    pub pet_id: i64,
    pub title: Option<String>,
    pub content: Option<String>,
    pub diary_date: NaiveDate,
    pub visibility: Visibility,
    pub is_ai_gen: bool,
    pub weather: Option<String>,
    pub mood: Option<String>,
    pub location_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = diaries)]
pub struct DiaryChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub diary_date: Option<NaiveDate>,
    pub visibility: Option<Visibility>,
    pub weather: Option<String>,
    pub mood: Option<String>,
    pub updated_at: Option<NaiveDateTime>,
}

impl DiaryChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.diary_date.is_none()
            && self.visibility.is_none()
            && self.weather.is_none()
            && self.mood.is_none()
    }

    pub fn apply_to(&self, diary: &mut Diary) {
        if let Some(title) = &self.title {
            diary.title = Some(title.clone());
        }
        if let Some(content) = &self.content {
            diary.content = Some(content.clone());
        }
        if let Some(date) = self.diary_date {
            diary.diary_date = date;
        }
        if let Some(visibility) = self.visibility {
            diary.visibility = visibility;
        }
        if let Some(weather) = &self.weather {
            diary.weather = Some(weather.clone());
        }
        if let Some(mood) = &self.mood {
            diary.mood = Some(mood.clone());
        }
        if let Some(updated_at) = self.updated_at {
            diary.updated_at = updated_at;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Diary))]
#[diesel(table_name = diary_images)]
pub struct DiaryImage {
    pub id: i64,
    pub diary_id: i64,
    pub user_id: i64,
    pub image_url: String,
    pub img_order: i32,
    pub main_image: bool,
    pub source: ImageSource,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = diary_images)]
pub struct NewDiaryImage {
    pub diary_id: i64,
    pub user_id: i64,
    pub image_url: String,
    pub img_order: i32,
    pub main_image: bool,
    pub source: ImageSource,
}

/// An image that belongs to a diary which has not been inserted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDraft {
    pub image_url: String,
    pub img_order: i32,
    pub main_image: bool,
    pub source: ImageSource,
}

impl ImageDraft {
    pub fn attach(&self, diary_id: i64, user_id: i64) -> NewDiaryImage {
        NewDiaryImage {
            diary_id,
            user_id,
            image_url: self.image_url.clone(),
            img_order: self.img_order,
            main_image: self.main_image,
            source: self.source,
        }
    }
}

/// Diary and its images, built together and linked on insert.
#[derive(Debug, Clone)]
pub struct NewDiaryRecord {
    pub diary: NewDiary,
    pub images: Vec<ImageDraft>,
    pub archive_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiaryRecord {
    pub diary: Diary,
    /// Sorted by `img_order`.
    pub images: Vec<DiaryImage>,
    pub archive_ids: Vec<i64>,
}

impl DiaryRecord {
    pub fn image_ids(&self) -> Vec<i64> {
        self.images.iter().map(|image| image.id).collect()
    }

    pub fn first_image_url(&self) -> Option<&str> {
        self.images.first().map(|image| image.image_url.as_str())
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Diary))]
#[diesel(table_name = diary_archives)]
pub struct DiaryArchive {
    pub id: i64,
    pub diary_id: i64,
    pub archive_id: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = diary_archives)]
pub struct NewDiaryArchive {
    pub diary_id: i64,
    pub archive_id: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = photo_metadata)]
pub struct PhotoMetadata {
    pub id: i64,
    pub image_id: i64,
    pub metadata: Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = photo_metadata)]
pub struct NewPhotoMetadata {
    pub image_id: i64,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = recaps)]
pub struct Recap {
    pub id: i64,
    pub pet_id: i64,
    pub user_id: i64,
    pub title: String,
    pub summary: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: RecapStatus,
    pub image_urls: Value,
    pub moment_count: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Recap {
    pub fn image_url_list(&self) -> Vec<String> {
        serde_json::from_value(self.image_urls.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = recaps)]
pub struct NewRecap {
    pub pet_id: i64,
    pub user_id: i64,
    pub title: String,
    pub summary: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: RecapStatus,
    pub image_urls: Value,
    pub moment_count: i32,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Recap))]
#[diesel(table_name = recap_highlights)]
pub struct RecapHighlight {
    pub id: i64,
    pub recap_id: i64,
    pub position: i32,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = recap_highlights)]
pub struct NewRecapHighlight {
    pub recap_id: i64,
    pub position: i32,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightDraft {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct NewRecapRecord {
    pub recap: NewRecap,
    pub highlights: Vec<HighlightDraft>,
}

impl NewRecapRecord {
    pub fn highlight_rows(&self, recap_id: i64) -> Vec<NewRecapHighlight> {
        self.highlights
            .iter()
            .enumerate()
            .map(|(index, highlight)| NewRecapHighlight {
                recap_id,
                position: index as i32,
                title: highlight.title.clone(),
                content: highlight.content.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecapRecord {
    pub recap: Recap,
    pub highlights: Vec<RecapHighlight>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = walk_routes)]
pub struct WalkRoute {
    pub id: i64,
    pub user_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = walk_routes)]
pub struct NewWalkRoute {
    pub user_id: i64,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}
