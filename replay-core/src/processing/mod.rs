pub mod audio_mixer;
pub mod pcm;
pub mod ring_buffer;
