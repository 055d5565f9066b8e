//! Read-only FUSE filesystem over a [`ReadEngine`].

#[cfg(feature = "fuse")]
mod impl_fuse {
    use std::ffi::OsStr;
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use fuser::{
        FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory,
        ReplyEmpty, ReplyEntry, ReplyOpen, Request,
    };
    use tracing::{debug, error, info};

    use crate::engine::{DirEntry, ReadEngine};
    use crate::error::VfsError;
    use crate::inode::InodeTable;
    use crate::metadata::FileStat;

    /// Mount-time settings that are not engine options.
    #[derive(Debug, Clone)]
    pub struct MountSettings {
        /// Filesystem name shown in the mount table.
        pub fs_name: String,
        /// Let users other than the mounting one access the filesystem.
        pub allow_other: bool,
    }

    impl Default for MountSettings {
        fn default() -> Self {
            Self {
                fs_name: "rusty-s3fs".into(),
                allow_other: false,
            }
        }
    }

    impl MountSettings {
        fn mount_options(&self) -> Vec<MountOption> {
            let mut options: Vec<MountOption> = vec![
                MountOption::RO,
                MountOption::FSName(self.fs_name.clone()),
                MountOption::Subtype("s3fs".into()),
            ];
            if self.allow_other {
                options.push(MountOption::AllowOther);
                options.push(MountOption::AutoUnmount);
            }
            options
        }
    }

    /// FUSE adapter translating kernel requests into engine calls.
    pub struct S3Vfs {
        engine: Arc<ReadEngine>,
        inodes: InodeTable,
        next_handle: AtomicU64,
        mount_time: SystemTime,
        uid: u32,
        gid: u32,
    }

    impl S3Vfs {
        /// Create an adapter serving `engine`.
        pub fn new(engine: Arc<ReadEngine>) -> Self {
            Self {
                engine,
                inodes: InodeTable::new(),
                next_handle: AtomicU64::new(1),
                mount_time: SystemTime::now(),
                uid: unsafe { libc::getuid() },
                gid: unsafe { libc::getgid() },
            }
        }

        pub fn engine(&self) -> &Arc<ReadEngine> {
            &self.engine
        }

        /// Convert engine metadata to FUSE file attributes.
        ///
        /// # Arguments
        /// * `ino` - Inode number
        /// * `stat` - Engine view of the path
        fn to_file_attr(&self, ino: u64, stat: &FileStat) -> FileAttr {
            let (kind, perm, nlink, size) = if stat.is_dir {
                (FileType::Directory, 0o555, 2, 0)
            } else {
                (FileType::RegularFile, 0o444, 1, stat.length)
            };
            let mtime: SystemTime = stat
                .last_modified
                .and_then(|secs| u64::try_from(secs).ok())
                .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
                .unwrap_or(self.mount_time);

            FileAttr {
                ino,
                size,
                blocks: size.div_ceil(512),
                atime: mtime,
                mtime,
                ctime: mtime,
                crtime: mtime,
                kind,
                perm,
                nlink,
                uid: self.uid,
                gid: self.gid,
                rdev: 0,
                blksize: 512,
                flags: 0,
            }
        }

        fn attr_ttl(&self) -> Duration {
            self.engine.options().kernel_cache.attr_ttl()
        }

        fn entry_ttl(&self) -> Duration {
            self.engine.options().kernel_cache.entry_ttl()
        }

        /// Stat an existing path by inode.
        fn stat_ino(&self, ino: u64) -> Result<(String, FileStat), VfsError> {
            let key: String = self.inodes.key(ino).ok_or_else(|| VfsError::NotFound {
                path: format!("<inode {}>", ino),
            })?;
            let stat: FileStat = self.engine.stat(&key)?;
            if !stat.exists {
                return Err(VfsError::NotFound { path: key });
            }
            Ok((key, stat))
        }
    }

    impl Filesystem for S3Vfs {
        fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
            let Some(name) = name.to_str() else {
                reply.error(libc::ENOENT);
                return;
            };
            let Some(key) = self.inodes.child_key(parent, name) else {
                reply.error(libc::ENOENT);
                return;
            };
            match self.engine.stat(&key) {
                Ok(stat) if stat.exists => {
                    let ino: u64 = self.inodes.get_or_insert(&key);
                    let attr: FileAttr = self.to_file_attr(ino, &stat);
                    reply.entry(&self.entry_ttl(), &attr, 0);
                }
                Ok(_) => reply.error(libc::ENOENT),
                Err(e) => {
                    debug!(key = %key, error = %e, "lookup failed");
                    reply.error(e.errno());
                }
            }
        }

        fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
            match self.stat_ino(ino) {
                Ok((_, stat)) => {
                    let attr: FileAttr = self.to_file_attr(ino, &stat);
                    reply.attr(&self.attr_ttl(), &attr);
                }
                Err(e) => reply.error(e.errno()),
            }
        }

        fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
            if flags & libc::O_ACCMODE != libc::O_RDONLY {
                reply.error(libc::EROFS);
                return;
            }
            match self.stat_ino(ino) {
                Ok((_, stat)) if stat.is_dir => reply.error(libc::EISDIR),
                Ok(_) => {
                    let fh: u64 = self.next_handle.fetch_add(1, Ordering::SeqCst);
                    let open_flags: u32 = if self.engine.options().kernel_cache.enable_page_cache {
                        fuser::consts::FOPEN_KEEP_CACHE
                    } else {
                        0
                    };
                    reply.opened(fh, open_flags);
                }
                Err(e) => reply.error(e.errno()),
            }
        }

        fn read(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            size: u32,
            _flags: i32,
            _lock: Option<u64>,
            reply: ReplyData,
        ) {
            let Some(key) = self.inodes.key(ino) else {
                reply.error(libc::ENOENT);
                return;
            };
            if offset < 0 {
                reply.error(libc::EINVAL);
                return;
            }
            match self.engine.read(&key, offset as u64, size as usize) {
                Ok(data) => reply.data(&data),
                Err(e) => {
                    error!(key = %key, offset, size, error = %e, "read failed");
                    reply.error(e.errno());
                }
            }
        }

        fn readdir(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            mut reply: ReplyDirectory,
        ) {
            let (key, stat) = match self.stat_ino(ino) {
                Ok(found) => found,
                Err(e) => {
                    reply.error(e.errno());
                    return;
                }
            };
            if !stat.is_dir {
                reply.error(libc::ENOTDIR);
                return;
            }

            let listing: Vec<DirEntry> = match self.engine.list_dir(&key) {
                Ok(l) => l,
                Err(e) => {
                    error!(key = %key, error = %e, "readdir failed");
                    reply.error(e.errno());
                    return;
                }
            };

            let mut entries: Vec<(u64, FileType, String)> = vec![
                (ino, FileType::Directory, ".".to_string()),
                (self.inodes.parent(ino), FileType::Directory, "..".to_string()),
            ];
            for entry in listing {
                let Some((child, _)) = self.inodes.child(ino, &entry.name) else {
                    continue;
                };
                let kind: FileType = if entry.is_dir {
                    FileType::Directory
                } else {
                    FileType::RegularFile
                };
                entries.push((child, kind, entry.name));
            }

            for (i, (e_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
                if reply.add(*e_ino, (i + 1) as i64, *kind, name) {
                    break;
                }
            }
            reply.ok();
        }

        fn release(
            &mut self,
            _req: &Request,
            _ino: u64,
            _fh: u64,
            _flags: i32,
            _lock: Option<u64>,
            _flush: bool,
            reply: ReplyEmpty,
        ) {
            reply.ok();
        }

        fn destroy(&mut self) {
            info!(bucket = self.engine.bucket(), "Unmounting");
            self.engine.shutdown();
        }
    }

    /// Mount `vfs` at `mountpoint` and serve until unmounted.
    ///
    /// # Arguments
    /// * `vfs` - The filesystem to mount
    /// * `mountpoint` - Path to mount at
    /// * `settings` - Mount table name and access options
    pub fn mount(vfs: S3Vfs, mountpoint: &Path, settings: &MountSettings) -> Result<(), VfsError> {
        info!(bucket = vfs.engine.bucket(), mountpoint = %mountpoint.display(), "Mounting");
        fuser::mount2(vfs, mountpoint, &settings.mount_options())
            .map_err(|e| VfsError::MountFailed(e.to_string()))
    }

    /// Spawn a mount in the background.
    ///
    /// # Returns
    /// Background session handle; dropping it unmounts.
    pub fn spawn_mount(
        vfs: S3Vfs,
        mountpoint: &Path,
        settings: &MountSettings,
    ) -> Result<fuser::BackgroundSession, VfsError> {
        fuser::spawn_mount2(vfs, mountpoint, &settings.mount_options())
            .map_err(|e| VfsError::MountFailed(e.to_string()))
    }

}

#[cfg(feature = "fuse")]
pub use impl_fuse::{mount, spawn_mount, MountSettings, S3Vfs};
