//! Playlist player: walks a playlist's sequences, honoring the three stop
//! strengths.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::{
    FeedStatus, PlaybackEngine, PlaybackError, Playlist, Sequence, SequenceFeed, ShowRequest,
    SyncPosition,
};
use crate::channel_data::ChannelBuffer;
use crate::context::AppContext;
use crate::status::PlaybackStatus;

struct ActiveShow {
    playlist: Playlist,
    repeat: bool,
    index: usize,
}

pub struct PlaylistPlayer {
    playlists_dir: PathBuf,
    sequences_dir: PathBuf,
    buffer: ChannelBuffer,
    feed: SequenceFeed,
    show: Option<ActiveShow>,
}

impl PlaylistPlayer {
    pub fn new(
        playlists_dir: PathBuf,
        sequences_dir: PathBuf,
        buffer: ChannelBuffer,
        feed: SequenceFeed,
    ) -> Self {
        Self {
            playlists_dir,
            sequences_dir,
            buffer,
            feed,
            show: None,
        }
    }

    pub fn start_at(
        &mut self,
        request: &ShowRequest,
        ctx: &mut AppContext,
        now: Instant,
    ) -> Result<(), PlaybackError> {
        let playlist = Playlist::load(&self.playlists_dir, &request.playlist)?;
        if playlist.is_empty() {
            return Err(PlaybackError::EmptyPlaylist(playlist.name));
        }
        let sequence = Sequence::open(&self.sequences_dir.join(&playlist.entries[0].sequence))?;

        info!(
            "Starting playlist {} ({} entries{})",
            playlist.name,
            playlist.len(),
            if request.repeat || playlist.repeat { ", repeating" } else { "" }
        );
        self.feed.load(sequence, now);
        self.show = Some(ActiveShow {
            repeat: request.repeat || playlist.repeat,
            playlist,
            index: 0,
        });
        ctx.set_status(PlaybackStatus::Playing);
        Ok(())
    }

    pub fn process_at(&mut self, ctx: &mut AppContext, now: Instant) {
        let status = ctx.status();
        if status == PlaybackStatus::StoppingNow {
            info!("Stopping playback now");
            self.feed.clear();
            self.buffer.blank();
            ctx.set_status(PlaybackStatus::Idle);
            return;
        }

        let Some(show) = self.show.as_mut() else {
            warn!("Playback active with no playlist loaded");
            ctx.set_status(PlaybackStatus::Idle);
            return;
        };

        match self.feed.advance(&self.buffer, now) {
            FeedStatus::Playing => return,
            FeedStatus::Finished => {}
            FeedStatus::Failed | FeedStatus::Empty => {
                ctx.set_status(PlaybackStatus::Idle);
                return;
            }
        }

        if status == PlaybackStatus::StoppingGracefully {
            info!("Playlist {} stopped after sequence", show.playlist.name);
            ctx.set_status(PlaybackStatus::Idle);
            return;
        }

        let next = if show.index + 1 < show.playlist.len() {
            show.index + 1
        } else if show.repeat && status != PlaybackStatus::StoppingGracefullyAfterLoop {
            0
        } else {
            info!("Playlist {} finished", show.playlist.name);
            ctx.set_status(PlaybackStatus::Idle);
            return;
        };

        let path = self.sequences_dir.join(&show.playlist.entries[next].sequence);
        match Sequence::open(&path) {
            Ok(sequence) => {
                debug!("Playlist {} entry {}: {}", show.playlist.name, next, sequence.name());
                self.feed.load(sequence, now);
                show.index = next;
            }
            Err(e) => {
                error!("Playlist {} cannot continue: {}", show.playlist.name, e);
                ctx.set_status(PlaybackStatus::Idle);
            }
        }
    }
}

impl PlaybackEngine for PlaylistPlayer {
    fn start(&mut self, request: &ShowRequest, ctx: &mut AppContext) -> Result<(), PlaybackError> {
        self.start_at(request, ctx, Instant::now())
    }

    fn process(&mut self, ctx: &mut AppContext) {
        self.process_at(ctx, Instant::now());
    }

    fn cleanup(&mut self, _ctx: &mut AppContext) {
        self.feed.clear();
        self.buffer.blank();
        if let Some(show) = self.show.take() {
            info!("Playlist {} cleaned up", show.playlist.name);
        }
    }

    fn current_playlist(&self) -> Option<&str> {
        self.show.as_ref().map(|s| s.playlist.name.as_str())
    }

    fn sync_position(&self) -> Option<SyncPosition> {
        self.show.as_ref()?;
        self.feed.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunFlag;
    use crate::mode::OperatingMode;
    use crate::playback::sequence::write_sequence;
    use crate::status::StopKind;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        player: PlaylistPlayer,
        buffer: ChannelBuffer,
        ctx: AppContext,
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    // Two 2-frame sequences at 10ms per frame; "a" writes 1s, "b" writes 2s.
    fn fixture(playlist_json: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("playlists")).unwrap();
        std::fs::create_dir(root.join("sequences")).unwrap();
        write_sequence(&root.join("sequences/a.mseq"), 10, 1, &[vec![1, 1], vec![1, 1]]);
        write_sequence(&root.join("sequences/b.mseq"), 10, 1, &[vec![2, 2], vec![2, 2]]);
        std::fs::write(root.join("playlists/show.json"), playlist_json).unwrap();

        let buffer = ChannelBuffer::new(2);
        let player = PlaylistPlayer::new(
            root.join("playlists"),
            root.join("sequences"),
            buffer.clone(),
            SequenceFeed::new(),
        );
        Fixture {
            _dir: dir,
            player,
            buffer,
            ctx: AppContext::new(OperatingMode::Player, RunFlag::new()),
        }
    }

    const TWO_ENTRIES: &str =
        r#"{"name":"show","entries":[{"sequence":"a.mseq"},{"sequence":"b.mseq"}]}"#;

    fn start(f: &mut Fixture, repeat: bool) -> Instant {
        let t0 = Instant::now();
        f.player
            .start_at(&ShowRequest::new("show", repeat), &mut f.ctx, t0)
            .unwrap();
        t0
    }

    #[test]
    fn test_start_sets_playing() {
        let mut f = fixture(TWO_ENTRIES);
        start(&mut f, false);
        assert_eq!(f.ctx.status(), PlaybackStatus::Playing);
        assert_eq!(f.player.current_playlist(), Some("show"));
    }

    #[test]
    fn test_start_failure_leaves_status_alone() {
        let mut f = fixture(TWO_ENTRIES);
        let err = f
            .player
            .start_at(&ShowRequest::new("nope", false), &mut f.ctx, Instant::now());
        assert!(matches!(err, Err(PlaybackError::PlaylistRead { .. })));
        assert_eq!(f.ctx.status(), PlaybackStatus::Idle);
        assert_eq!(f.player.current_playlist(), None);
    }

    #[test]
    fn test_empty_playlist_rejected() {
        let mut f = fixture(r#"{"name":"show","entries":[]}"#);
        let err = f
            .player
            .start_at(&ShowRequest::new("show", false), &mut f.ctx, Instant::now());
        assert!(matches!(err, Err(PlaybackError::EmptyPlaylist(_))));
    }

    #[test]
    fn test_plays_through_then_idles() {
        let mut f = fixture(TWO_ENTRIES);
        let t0 = start(&mut f, false);

        f.player.process_at(&mut f.ctx, t0 + ms(5));
        assert_eq!(f.buffer.snapshot(), vec![1, 1]);

        // a finishes, b loaded at +25
        f.player.process_at(&mut f.ctx, t0 + ms(25));
        assert_eq!(f.ctx.status(), PlaybackStatus::Playing);
        f.player.process_at(&mut f.ctx, t0 + ms(30));
        assert_eq!(f.buffer.snapshot(), vec![2, 2]);

        f.player.process_at(&mut f.ctx, t0 + ms(50));
        assert_eq!(f.ctx.status(), PlaybackStatus::Idle);
    }

    #[test]
    fn test_repeat_wraps_to_first_entry() {
        let mut f = fixture(TWO_ENTRIES);
        let t0 = start(&mut f, true);
        f.player.process_at(&mut f.ctx, t0 + ms(25)); // -> b
        f.player.process_at(&mut f.ctx, t0 + ms(50)); // -> a again
        f.player.process_at(&mut f.ctx, t0 + ms(55));
        assert_eq!(f.ctx.status(), PlaybackStatus::Playing);
        assert_eq!(f.buffer.snapshot(), vec![1, 1]);
    }

    #[test]
    fn test_graceful_stop_ends_after_current_sequence() {
        let mut f = fixture(TWO_ENTRIES);
        let t0 = start(&mut f, true);
        assert!(f.ctx.request_stop(StopKind::Graceful));

        f.player.process_at(&mut f.ctx, t0 + ms(5));
        assert_eq!(f.ctx.status(), PlaybackStatus::StoppingGracefully);
        f.player.process_at(&mut f.ctx, t0 + ms(25));
        assert_eq!(f.ctx.status(), PlaybackStatus::Idle);
    }

    #[test]
    fn test_after_loop_stop_finishes_the_pass() {
        let mut f = fixture(TWO_ENTRIES);
        let t0 = start(&mut f, true);
        assert!(f.ctx.request_stop(StopKind::GracefulAfterLoop));

        f.player.process_at(&mut f.ctx, t0 + ms(25)); // a done, b next
        assert_eq!(f.ctx.status(), PlaybackStatus::StoppingGracefullyAfterLoop);
        f.player.process_at(&mut f.ctx, t0 + ms(50)); // b done, no wrap
        assert_eq!(f.ctx.status(), PlaybackStatus::Idle);
    }

    #[test]
    fn test_stop_now_blanks_immediately() {
        let mut f = fixture(TWO_ENTRIES);
        let t0 = start(&mut f, false);
        f.player.process_at(&mut f.ctx, t0 + ms(5));
        assert_eq!(f.buffer.snapshot(), vec![1, 1]);

        assert!(f.ctx.request_stop(StopKind::Now));
        f.player.process_at(&mut f.ctx, t0 + ms(6));
        assert_eq!(f.ctx.status(), PlaybackStatus::Idle);
        assert_eq!(f.buffer.snapshot(), vec![0, 0]);
    }

    #[test]
    fn test_cleanup_blanks_and_forgets() {
        let mut f = fixture(TWO_ENTRIES);
        let t0 = start(&mut f, false);
        f.player.process_at(&mut f.ctx, t0 + ms(5));
        assert!(f.player.sync_position().is_some());

        f.player.cleanup(&mut f.ctx);
        assert_eq!(f.player.current_playlist(), None);
        assert_eq!(f.player.sync_position(), None);
        assert_eq!(f.buffer.snapshot(), vec![0, 0]);
    }

    #[test]
    fn test_missing_sequence_goes_idle() {
        let mut f = fixture(
            r#"{"name":"show","entries":[{"sequence":"a.mseq"},{"sequence":"gone.mseq"}]}"#,
        );
        let t0 = start(&mut f, false);
        f.player.process_at(&mut f.ctx, t0 + ms(25));
        assert_eq!(f.ctx.status(), PlaybackStatus::Idle);
    }
}
