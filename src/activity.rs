//! Activity feed entries and their tag-driven decoding
//!
//! Every feed entry carries an integer type tag that fully determines the
//! shape of its payload. One tag marks a composite entry whose payload is a
//! list of further entries by the same author; those are expanded in place,
//! one level deep.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::{BlockingDispatcher, Dispatcher};
use crate::error::ApiError;
use crate::pagination::{paginate, paginate_stream, Page};
use crate::request::RequestDescriptor;
use crate::session::{BlockingSession, Session};

/// Entries per feed page when the caller does not say otherwise
pub const DEFAULT_FEED_PAGE_SIZE: usize = 50;

/// The closed set of feed entry tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "u8")]
pub enum ActivityType {
    PlayedGame = 1,
    PlayedChallenge = 2,
    CreatedMap = 3,
    ObtainedBadge = 4,
    LikedMap = 5,
    PlayedCompetitiveGame = 6,
    /// Composite entry wrapping several others
    MultipleActivities = 7,
    PlayedQuiz = 8,
    PlayedMultiplayerGame = 9,
    PlayedInfinityGame = 10,
    PlayedCompetitiveTeamGame = 11,
    PlayedQuickplayGame = 12,
    PlayedPublicTeamDuel = 13,
}

impl ActivityType {
    pub fn is_composite(&self) -> bool {
        matches!(self, ActivityType::MultipleActivities)
    }

    /// Maps a wire tag, failing on anything outside the known set
    pub fn from_tag(tag: i64) -> Result<Self, ApiError> {
        u8::try_from(tag)
            .ok()
            .and_then(|tag| ActivityType::try_from(tag).ok())
            .ok_or_else(|| ApiError::DecodeFailed(format!("Unknown activity type {}", tag)))
    }
}

impl TryFrom<u8> for ActivityType {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            1 => ActivityType::PlayedGame,
            2 => ActivityType::PlayedChallenge,
            3 => ActivityType::CreatedMap,
            4 => ActivityType::ObtainedBadge,
            5 => ActivityType::LikedMap,
            6 => ActivityType::PlayedCompetitiveGame,
            7 => ActivityType::MultipleActivities,
            8 => ActivityType::PlayedQuiz,
            9 => ActivityType::PlayedMultiplayerGame,
            10 => ActivityType::PlayedInfinityGame,
            11 => ActivityType::PlayedCompetitiveTeamGame,
            12 => ActivityType::PlayedQuickplayGame,
            13 => ActivityType::PlayedPublicTeamDuel,
            other => return Err(other),
        })
    }
}

impl From<ActivityType> for u8 {
    fn from(kind: ActivityType) -> u8 {
        kind as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayedGameActivity {
    pub map_slug: String,
    #[serde(default)]
    pub map_name: Option<String>,
    pub points: i64,
    pub game_token: String,
    pub game_mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayedChallengeActivity {
    pub map_slug: String,
    pub map_name: String,
    pub points: i64,
    pub challenge_token: String,
    pub game_mode: String,
    #[serde(default)]
    pub is_daily_challenge: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedMapActivity {
    pub map_slug: String,
    pub map_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObtainedBadgeActivity {
    pub badge_id: String,
    pub badge_name: String,
    pub badge_level: i64,
    pub image_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikedMapActivity {
    pub map_slug: String,
    /// The API spells this one in lowercase
    #[serde(rename = "mapname")]
    pub map_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayedCompetitiveActivity {
    pub game_id: String,
    pub game_mode: String,
    #[serde(default)]
    pub competitive_game_mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayedQuizActivity {
    pub quiz_id: String,
    pub quiz_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayedMultiplayerActivity {
    pub game_id: String,
    pub party_id: String,
    pub game_mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfinityGameActivity {
    pub points: i64,
    pub game_token: String,
    pub is_challenge: bool,
}

/// A decoded payload, one variant per shape
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActivityPayload {
    PlayedGame(PlayedGameActivity),
    PlayedChallenge(PlayedChallengeActivity),
    CreatedMap(CreatedMapActivity),
    ObtainedBadge(ObtainedBadgeActivity),
    LikedMap(LikedMapActivity),
    PlayedCompetitive(PlayedCompetitiveActivity),
    PlayedQuiz(PlayedQuizActivity),
    PlayedMultiplayer(PlayedMultiplayerActivity),
    InfinityGame(InfinityGameActivity),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityUserAvatar {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub anchor: String,
}

/// Author of a feed entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityUser {
    pub id: String,
    pub nick: String,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub flair: i64,
    #[serde(default)]
    pub avatar: ActivityUserAvatar,
}

/// A feed entry as it arrives, payload still untyped
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawActivity {
    #[serde(rename = "type")]
    pub tag: i64,
    pub time: DateTime<Utc>,
    pub user: ActivityUser,
    #[serde(default)]
    pub payload: Value,
}

/// An entry inside a composite payload; its author is the outer entry's
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct SubActivity {
    #[serde(rename = "type")]
    tag: i64,
    time: DateTime<Utc>,
    #[serde(default)]
    payload: Value,
}

/// A fully decoded feed item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub time: DateTime<Utc>,
    pub user: ActivityUser,
    pub payload: ActivityPayload,
}

/// One page of the feed endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    #[serde(default)]
    pub entries: Vec<RawActivity>,
    #[serde(default)]
    pub pagination_token: Option<String>,
}

/// Outer entries carry their payload as JSON text, sub-entries inline
fn parse_payload<T: DeserializeOwned>(payload: Value) -> Result<T, ApiError> {
    let decoded = match payload {
        Value::String(text) => serde_json::from_str(&text),
        inline => serde_json::from_value(inline),
    };
    decoded.map_err(|e| ApiError::DecodeFailed(format!("Invalid activity payload: {}", e)))
}

fn decode_payload(kind: ActivityType, payload: Value) -> Result<ActivityPayload, ApiError> {
    use ActivityType::*;

    Ok(match kind {
        PlayedGame | PlayedQuickplayGame => ActivityPayload::PlayedGame(parse_payload(payload)?),
        PlayedChallenge => ActivityPayload::PlayedChallenge(parse_payload(payload)?),
        CreatedMap => ActivityPayload::CreatedMap(parse_payload(payload)?),
        ObtainedBadge => ActivityPayload::ObtainedBadge(parse_payload(payload)?),
        LikedMap => ActivityPayload::LikedMap(parse_payload(payload)?),
        PlayedCompetitiveGame | PlayedCompetitiveTeamGame | PlayedPublicTeamDuel => {
            ActivityPayload::PlayedCompetitive(parse_payload(payload)?)
        }
        PlayedQuiz => ActivityPayload::PlayedQuiz(parse_payload(payload)?),
        PlayedMultiplayerGame => ActivityPayload::PlayedMultiplayer(parse_payload(payload)?),
        PlayedInfinityGame => ActivityPayload::InfinityGame(parse_payload(payload)?),
        MultipleActivities => {
            return Err(ApiError::DecodeFailed(
                "Composite activity nested inside a composite activity".to_string(),
            ))
        }
    })
}

/// Decodes one non-composite entry
pub fn decode_activity(
    tag: i64,
    time: DateTime<Utc>,
    user: &ActivityUser,
    payload: Value,
) -> Result<Activity, ApiError> {
    let kind = ActivityType::from_tag(tag)?;
    Ok(Activity {
        kind,
        time,
        user: user.clone(),
        payload: decode_payload(kind, payload)?,
    })
}

/// Decodes a raw feed entry into one item, or several for a composite entry
pub fn expand_entry(raw: RawActivity) -> Result<Vec<Activity>, ApiError> {
    let kind = ActivityType::from_tag(raw.tag)?;
    if !kind.is_composite() {
        return Ok(vec![decode_activity(raw.tag, raw.time, &raw.user, raw.payload)?]);
    }

    let subs: Vec<SubActivity> = parse_payload(raw.payload)?;
    subs.into_iter()
        .map(|sub| decode_activity(sub.tag, sub.time, &raw.user, sub.payload))
        .collect()
}

/// Request for one page of the private or friends feed
///
/// The first page is always fetched live so new activity shows up; later
/// pages are addressed by token and safe to cache.
pub fn feed_request(cursor: Option<&str>, per_page: usize, friends: bool) -> RequestDescriptor {
    let target = if friends {
        "api/v4/feed/friends"
    } else {
        "api/v4/feed/private"
    };
    let mut descriptor = RequestDescriptor::get(target)
        .param("count", per_page)
        .needs_auth(true)
        .do_not_cache(cursor.is_none());
    if let Some(token) = cursor.filter(|t| !t.is_empty()) {
        descriptor = descriptor.param("paginationToken", token);
    }
    descriptor
}

/// Parses a feed page body into the generic page shape
pub fn parse_feed_page(body: &str) -> Result<Page<RawActivity, String>, ApiError> {
    let page: FeedPage = serde_json::from_str(body)?;
    // The server signals the last page with an empty token as well as a missing one
    let next = page.pagination_token.filter(|t| !t.is_empty());
    Ok(Page::new(page.entries, next))
}

/// Walks the feed page by page, blocking
pub fn iter_activity_feed<S: BlockingSession>(
    dispatcher: &BlockingDispatcher<S>,
    per_page: usize,
    friends: bool,
) -> impl Iterator<Item = Result<Activity, ApiError>> + '_ {
    paginate(
        move |cursor: Option<String>| {
            tracing::debug!(?cursor, friends, "fetching feed page");
            let body = dispatcher.dispatch(&feed_request(cursor.as_deref(), per_page, friends))?;
            parse_feed_page(&body)
        },
        expand_entry,
    )
}

/// Walks the feed page by page as a stream
///
/// The dispatcher is owned by the stream and released with it.
pub fn activity_feed<S>(
    dispatcher: Dispatcher<S>,
    per_page: usize,
    friends: bool,
) -> impl Stream<Item = Result<Activity, ApiError>>
where
    S: Session + Clone,
{
    paginate_stream(
        move |cursor: Option<String>| {
            let dispatcher = dispatcher.clone();
            async move {
                tracing::debug!(?cursor, friends, "fetching feed page");
                let descriptor = feed_request(cursor.as_deref(), per_page, friends);
                let body = dispatcher.dispatch(&descriptor).await?;
                parse_feed_page(&body)
            }
        },
        expand_entry,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credential, Settings};
    use crate::dispatch::ApiContext;
    use crate::session::tests::ScriptedTransport;
    use crate::session::PlainSession;
    use crate::transport::TransportResponse;
    use futures::TryStreamExt;
    use serde_json::json;

    fn user() -> Value {
        json!({
            "id": "5f1a",
            "nick": "explorer",
            "isVerified": false,
            "flair": 0,
            "avatar": {"url": "pin/abc.png", "isDefault": false, "anchor": "center-center"}
        })
    }

    fn played_game(token: &str) -> Value {
        json!({
            "mapSlug": "world",
            "mapName": "A Diverse World",
            "points": 21345,
            "gameToken": token,
            "gameMode": "Standard"
        })
    }

    /// Outer entries carry their payload as a JSON string
    fn entry(tag: i64, payload: &Value) -> Value {
        json!({
            "type": tag,
            "time": "2024-03-01T12:00:00Z",
            "user": user(),
            "payload": payload.to_string()
        })
    }

    fn raw(value: Value) -> RawActivity {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_decode_simple_entry() {
        let items = expand_entry(raw(entry(1, &played_game("g1")))).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, ActivityType::PlayedGame);
        assert_eq!(items[0].user.nick, "explorer");
        match &items[0].payload {
            ActivityPayload::PlayedGame(game) => {
                assert_eq!(game.game_token, "g1");
                assert_eq!(game.points, 21345);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_composite_expands_in_order_with_outer_author() {
        let subs = json!([
            {"type": 1, "time": "2024-03-01T11:00:00Z", "payload": played_game("first")},
            {"type": 5, "time": "2024-03-01T11:30:00Z", "payload": {"mapSlug": "abc", "mapname": "Liked"}}
        ]);
        let items = expand_entry(raw(entry(7, &subs))).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, ActivityType::PlayedGame);
        assert_eq!(items[1].kind, ActivityType::LikedMap);
        assert!(items.iter().all(|item| item.user.id == "5f1a"));
        match &items[1].payload {
            ActivityPayload::LikedMap(liked) => assert_eq!(liked.map_name, "Liked"),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_nested_composite_is_rejected() {
        let subs = json!([{"type": 7, "time": "2024-03-01T11:00:00Z", "payload": []}]);
        let err = expand_entry(raw(entry(7, &subs))).unwrap_err();
        assert!(matches!(err, ApiError::DecodeFailed(_)));
    }

    #[test]
    fn test_unknown_tag_is_decode_failure() {
        let err = expand_entry(raw(entry(99, &json!({})))).unwrap_err();
        match err {
            ApiError::DecodeFailed(message) => assert!(message.contains("99")),
            other => panic!("expected DecodeFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_shared_shapes() {
        let competitive = json!({"gameId": "d1", "gameMode": "Duels", "competitiveGameMode": "StandardDuels"});
        for tag in [6, 11, 13] {
            let items = expand_entry(raw(entry(tag, &competitive))).unwrap();
            assert!(matches!(items[0].payload, ActivityPayload::PlayedCompetitive(_)));
        }
        let quickplay = expand_entry(raw(entry(12, &played_game("q")))).unwrap();
        assert_eq!(quickplay[0].kind, ActivityType::PlayedQuickplayGame);
        assert!(matches!(quickplay[0].payload, ActivityPayload::PlayedGame(_)));
    }

    #[test]
    fn test_payload_shape_mismatch_is_decode_failure() {
        let err = expand_entry(raw(entry(4, &played_game("x")))).unwrap_err();
        assert!(matches!(err, ApiError::DecodeFailed(_)));
    }

    #[test]
    fn test_tag_mapping_is_total_over_known_range() {
        for tag in 1u8..=13 {
            let kind = ActivityType::try_from(tag).unwrap();
            assert_eq!(u8::from(kind), tag);
        }
        assert!(ActivityType::try_from(0u8).is_err());
        assert!(ActivityType::try_from(14u8).is_err());
        assert!(ActivityType::from_tag(-1).is_err());
    }

    #[test]
    fn test_feed_request_shape() {
        let first = feed_request(None, 50, false);
        assert_eq!(first.target, "api/v4/feed/private");
        assert!(first.needs_auth);
        assert!(first.do_not_cache);
        assert_eq!(first.rendered_params(), vec![("count".to_string(), "50".to_string())]);

        let next = feed_request(Some("tok"), 10, true);
        assert_eq!(next.target, "api/v4/feed/friends");
        assert!(!next.do_not_cache);
        assert_eq!(
            next.rendered_params(),
            vec![
                ("count".to_string(), "10".to_string()),
                ("paginationToken".to_string(), "tok".to_string())
            ]
        );
    }

    fn feed_body(entries: Vec<Value>, token: Option<&str>) -> String {
        json!({"entries": entries, "paginationToken": token}).to_string()
    }

    fn context() -> (ApiContext, tempfile::TempDir) {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        let settings = Settings::default().with_cache_root(temp_dir.path().to_path_buf());
        (ApiContext::new(settings).with_credential(Credential::fixed("t")), temp_dir)
    }

    #[test]
    fn test_feed_walks_pages_and_stops_on_empty() {
        let composite = json!([
            {"type": 3, "time": "2024-03-01T10:00:00Z", "payload": {"mapSlug": "m", "mapName": "New map"}},
            {"type": 8, "time": "2024-03-01T10:05:00Z", "payload": {"quizId": "q1", "quizName": "Flags"}}
        ]);
        let transport = ScriptedTransport::new(vec![
            Ok(TransportResponse::new(
                200,
                feed_body(vec![entry(1, &played_game("a")), entry(7, &composite)], Some("p2")),
            )),
            Ok(TransportResponse::new(200, feed_body(vec![entry(10, &json!({"points": 5, "gameToken": "i", "isChallenge": false}))], Some("p3")))),
            Ok(TransportResponse::new(200, feed_body(vec![], Some("p4")))),
        ]);
        let (ctx, _dir) = context();
        let dispatcher = ctx.blocking_dispatcher(PlainSession::new(transport.clone()));

        let kinds: Vec<ActivityType> = iter_activity_feed(&dispatcher, 2, false)
            .map(|item| item.map(|a| a.kind))
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(
            kinds,
            vec![
                ActivityType::PlayedGame,
                ActivityType::CreatedMap,
                ActivityType::PlayedQuiz,
                ActivityType::PlayedInfinityGame
            ]
        );
        assert_eq!(transport.calls(), 3);
    }

    #[test]
    fn test_empty_pagination_token_ends_feed() {
        let page = parse_feed_page(r#"{"entries":[],"paginationToken":""}"#).unwrap();
        assert_eq!(page.next, None);

        let transport = ScriptedTransport::new(vec![
            Ok(TransportResponse::new(200, feed_body(vec![entry(1, &played_game("a"))], Some("")))),
            Ok(TransportResponse::new(200, feed_body(vec![entry(1, &played_game("b"))], None))),
        ]);
        let (ctx, _dir) = context();
        let dispatcher = ctx.blocking_dispatcher(PlainSession::new(transport.clone()));

        let items: Vec<_> = iter_activity_feed(&dispatcher, 2, false)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(transport.calls(), 1);

        let request = feed_request(Some(""), 2, false);
        assert_eq!(request.rendered_params(), vec![("count".to_string(), "2".to_string())]);
    }

    #[test]
    fn test_unknown_tag_halts_feed() {
        let transport = ScriptedTransport::new(vec![Ok(TransportResponse::new(
            200,
            feed_body(
                vec![entry(1, &played_game("a")), entry(42, &json!({})), entry(1, &played_game("b"))],
                Some("next"),
            ),
        ))]);
        let (ctx, _dir) = context();
        let dispatcher = ctx.blocking_dispatcher(PlainSession::new(transport.clone()));

        let results: Vec<_> = iter_activity_feed(&dispatcher, 3, true).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ApiError::DecodeFailed(_))));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_async_feed_stream() {
        let transport = ScriptedTransport::new(vec![
            Ok(TransportResponse::new(200, feed_body(vec![entry(2, &json!({
                "mapSlug": "world",
                "mapName": "A Diverse World",
                "points": 10000,
                "challengeToken": "c1",
                "gameMode": "Standard",
                "isDailyChallenge": true
            }))], None))),
        ]);
        let (ctx, _dir) = context();
        let dispatcher = ctx.dispatcher(PlainSession::new(transport.clone()));

        let items: Vec<Activity> = activity_feed(dispatcher, DEFAULT_FEED_PAGE_SIZE, false)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        match &items[0].payload {
            ActivityPayload::PlayedChallenge(challenge) => {
                assert_eq!(challenge.is_daily_challenge, Some(true))
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(transport.calls(), 1);
    }
}
